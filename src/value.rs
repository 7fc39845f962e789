use core::any::{Any, type_name};
use core::fmt;

/// Type-erased value stored in a data slot.
///
/// Storage is allocated once per type: [`make_as`] keeps the
/// existing allocation when the stored type already matches, so a slot that
/// is refilled run after run (e.g. a cleared `Vec`) keeps its capacity.
pub(crate) struct AnyValue {
    data: Box<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl AnyValue {
    pub(crate) fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            data: Box::new(value),
            type_name: type_name::<T>(),
        }
    }

    /// Name of the stored type, for diagnostics.
    pub(crate) fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub(crate) fn read_as<T: Any>(&self) -> Option<&T> {
        self.data.downcast_ref()
    }

    pub(crate) fn read_as_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.data.downcast_mut()
    }

    /// Interprets a numeric or boolean value as `i64`.
    ///
    /// Used for condition results and gate variables.
    pub(crate) fn as_number(&self) -> Option<i64> {
        let data = &*self.data;
        if let Some(v) = data.downcast_ref::<i64>() {
            Some(*v)
        } else if let Some(v) = data.downcast_ref::<i32>() {
            Some(i64::from(*v))
        } else if let Some(v) = data.downcast_ref::<u32>() {
            Some(i64::from(*v))
        } else if let Some(v) = data.downcast_ref::<bool>() {
            Some(i64::from(*v))
        } else if let Some(v) = data.downcast_ref::<u64>() {
            i64::try_from(*v).ok()
        } else if let Some(v) = data.downcast_ref::<usize>() {
            i64::try_from(*v).ok()
        } else {
            None
        }
    }
}

impl fmt::Debug for AnyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnyValue")
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

/// Returns storage for a `T`, allocating a default one only if the slot is
/// empty or holds another type.
pub(crate) fn make_as<T: Any + Default + Send + Sync>(slot: &mut Option<AnyValue>) -> &mut T {
    let reusable = slot.as_ref().is_some_and(|v| v.data.is::<T>());
    if !reusable {
        *slot = Some(AnyValue::new(T::default()));
    }
    slot.as_mut()
        .and_then(AnyValue::read_as_mut)
        .expect("value::make_as")
}

/// Stores `value`, overwriting in place when the stored type matches.
pub(crate) fn write_as<T: Any + Send + Sync>(slot: &mut Option<AnyValue>, value: T) {
    match slot.as_mut().and_then(AnyValue::read_as_mut::<T>) {
        Some(stored) => *stored = value,
        None => *slot = Some(AnyValue::new(value)),
    }
}
