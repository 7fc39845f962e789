#![allow(missing_docs)]
#![cfg(not(feature = "loom"))]

use gateflow::{
    config::{ExecutorKind, GraphConfig},
    error::ProcessError,
    graph::{GraphBuilder, ProcessContext},
    processor::{Processor, Registry},
};
use proptest::prelude::*;
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

const MAX_VERTICES: usize = 10;

/// Vertex `idx` publishes `idx` plus the sum of its enabled inputs.
struct Node {
    idx: usize,
    output: String,
    runs: Arc<Mutex<Vec<usize>>>,
}

impl Processor for Node {
    fn process(&mut self, ctx: &ProcessContext<'_>) -> Result<(), ProcessError> {
        self.runs.lock().unwrap().push(self.idx);
        let mut sum = self.idx as u64;
        for slot in ctx.optional_inputs() {
            sum += ctx.get::<u64>(slot)?.copied().unwrap_or(0);
        }
        ctx.publish(&self.output, sum)?;
        Ok(())
    }
}

/// Inputs of each vertex: producer index and gate value, if gated.
type Deps = Vec<Vec<(usize, Option<bool>)>>;

fn dag() -> impl Strategy<Value = (Deps, usize, bool)> {
    (1..=MAX_VERTICES).prop_flat_map(|n| {
        let deps = (0..n)
            .map(|idx| {
                proptest::collection::vec(
                    (0..idx.max(1), prop_oneof![Just(None), any::<bool>().prop_map(Some)]),
                    if idx == 0 { 0..1 } else { 0..4 },
                )
            })
            .collect::<Vec<_>>();
        (deps, 0..n, any::<bool>())
    })
}

/// Dedups inputs per vertex the way the builder does; the first gate wins.
fn normalize(deps: Deps) -> Deps {
    deps.into_iter()
        .map(|inputs| {
            let mut seen = BTreeMap::new();
            for (from, gate) in inputs {
                seen.entry(from).or_insert(gate);
            }
            seen.into_iter().collect()
        })
        .collect()
}

/// Runs that must happen for `target` and the value each one publishes.
fn expected(deps: &Deps, idx: usize, ran: &mut BTreeMap<usize, u64>) -> u64 {
    if let Some(&value) = ran.get(&idx) {
        return value;
    }
    let mut sum = idx as u64;
    for &(from, gate) in &deps[idx] {
        if gate != Some(false) {
            sum += expected(deps, from, ran);
        }
    }
    ran.insert(idx, sum);
    sum
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn runs_exactly_the_enabled_upstream_closure((deps, target, inline) in dag()) {
        let deps = normalize(deps);
        let runs = Arc::new(Mutex::new(Vec::new()));
        let registry = Registry::new();
        let config = GraphConfig::default().executor(if inline {
            ExecutorKind::Inline
        } else {
            ExecutorKind::RayonGlobal
        });
        let mut builder = GraphBuilder::new(&registry).with_config(config);
        for (idx, inputs) in deps.iter().enumerate() {
            let mut vertex = builder.add_vertex_with(
                &format!("v{idx}"),
                Node { idx, output: format!("s{idx}"), runs: runs.clone() },
            );
            for &(from, gate) in inputs {
                let edge = vertex.optional_depend(&format!("s{from}"));
                if gate.is_some() {
                    edge.gate_on(&format!("g_{from}_{idx}")).unwrap();
                }
            }
            vertex.emit(&format!("s{idx}")).unwrap();
        }
        let mut graph = builder.build().unwrap();

        let mut want = BTreeMap::new();
        let value = expected(&deps, target, &mut want);
        for round in 0..2 {
            for (idx, inputs) in deps.iter().enumerate() {
                for &(from, gate) in inputs {
                    if let Some(open) = gate {
                        graph.publish(format!("g_{from}_{idx}").as_str(), open).unwrap();
                    }
                }
            }
            graph.run(format!("s{target}").as_str()).unwrap().wait().unwrap();
            prop_assert_eq!(graph.read::<u64>(format!("s{target}").as_str()), Ok(&value));

            let mut ran = std::mem::take(&mut *runs.lock().unwrap());
            ran.sort_unstable();
            let want_ran: Vec<_> = want.keys().copied().collect();
            prop_assert_eq!(ran, want_ran, "round {}", round);
            graph.reset();
        }
    }
}
