use super::core::ChainElement;
use crate::unit::HandlerUnit;
use std::collections::VecDeque;

/// The not-yet-evaluated tail of the executing chain.
///
/// Units reach it through [`UnitScope::remnant`](crate::unit::UnitScope::remnant).
/// Elements inserted with [`insert_next`](Self::insert_next) during one step
/// run right after the current unit, in the order they were inserted.
#[derive(Debug, Default)]
pub struct ChainRemnant {
    pending: VecDeque<ChainElement>,
    cursor: usize,
}

impl ChainRemnant {
    #[must_use]
    pub fn new(elements: Vec<ChainElement>) -> Self {
        Self {
            pending: elements.into(),
            cursor: 0,
        }
    }

    /// Run `element` after the current unit, and after anything this unit
    /// already inserted.
    pub fn insert_next(&mut self, element: impl Into<ChainElement>) {
        self.pending.insert(self.cursor, element.into());
        self.cursor += 1;
    }

    pub fn insert_unit(&mut self, unit: impl HandlerUnit + 'static) {
        self.insert_next(ChainElement::instance(unit));
    }

    /// Run `element` after everything else.
    pub fn append(&mut self, element: impl Into<ChainElement>) {
        self.pending.push_back(element.into());
    }

    pub fn append_unit(&mut self, unit: impl HandlerUnit + 'static) {
        self.append(ChainElement::instance(unit));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    #[must_use]
    pub fn describe(&self) -> Vec<String> {
        self.pending.iter().map(ChainElement::describe).collect()
    }

    /// Take the next element and start a new insertion step.
    pub(crate) fn take_next(&mut self) -> Option<ChainElement> {
        self.cursor = 0;
        self.pending.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::UnitSpec;

    #[test]
    fn test_insert_next_keeps_insertion_order() {
        let mut remnant = ChainRemnant::new(vec![ChainElement::spec("c")]);
        remnant.insert_next(UnitSpec::new("a"));
        remnant.insert_next(UnitSpec::new("b"));
        remnant.append(UnitSpec::new("z"));
        assert_eq!(remnant.describe(), vec!["spec:a", "spec:b", "spec:c", "spec:z"]);
    }

    #[test]
    fn test_take_next_resets_cursor() {
        let mut remnant = ChainRemnant::new(vec![ChainElement::spec("a"), ChainElement::spec("b")]);
        remnant.insert_next(UnitSpec::new("x"));
        assert_eq!(remnant.take_next().map(|e| e.describe()), Some("spec:x".into()));
        remnant.insert_next(UnitSpec::new("y"));
        assert_eq!(remnant.describe(), vec!["spec:y", "spec:a", "spec:b"]);
        assert_eq!(remnant.len(), 3);
    }
}
