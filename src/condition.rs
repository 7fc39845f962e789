use crate::{
    error::ProcessError,
    expr::Expr,
    graph::{build::SetupContext, context::ProcessContext},
    processor::Processor,
    types::SlotId,
};
use tracing::trace;

/// Evaluates a gate expression and publishes the result as an `i64`.
///
/// Each variable of the expression is an input slot holding an integer or a
/// `bool`. Created by `EdgeHandle::gate_on`; never registered.
#[derive(Debug)]
pub(crate) struct ConditionProcessor {
    expr: Expr,
    output: String,
    inputs: Vec<SlotId>,
    result: Option<SlotId>,
}

impl ConditionProcessor {
    pub(crate) fn new(expr: Expr, output: String) -> Self {
        Self {
            expr,
            output,
            inputs: Vec::new(),
            result: None,
        }
    }
}

impl Processor for ConditionProcessor {
    fn setup(&mut self, ctx: &mut SetupContext<'_>) -> Result<(), ProcessError> {
        self.inputs = self
            .expr
            .variables()
            .iter()
            .map(|name| ctx.depend(name))
            .collect();
        self.result = Some(ctx.slot(&self.output));
        Ok(())
    }

    fn process(&mut self, ctx: &ProcessContext<'_>) -> Result<(), ProcessError> {
        let values = self
            .inputs
            .iter()
            .map(|&slot| ctx.read_number(slot))
            .collect::<Result<Vec<_>, _>>()?;
        let variables = self.expr.variables();
        let value = self.expr.evaluate(|name| {
            variables
                .iter()
                .position(|var| var == name)
                .map(|idx| values[idx])
        })?;
        trace!(vertex = ctx.vertex_name(), expr = self.expr.source(), value, "condition evaluated");
        ctx.publish(self.result.expect("ConditionProcessor::process"), value)?;
        Ok(())
    }
}
