//! Control flow between steps and goals

use super::values::Val;

/// Outcome of a step or goal that did not fail
///
/// `Exit` unwinds enclosing goal iterations: each goal that receives it
/// stops its own iteration and hands `levels - 1` to its caller.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Control {
    #[default]
    None,
    Exit { levels: usize },
    Return(Option<Val>),
}

impl Control {
    /// Control handed to the caller of a goal that stopped with `self`
    pub fn unwind(self) -> Control {
        match self {
            Control::Exit { levels } if levels > 1 => Control::Exit { levels: levels - 1 },
            Control::Exit { .. } => Control::None,
            other => other,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Control::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unwind_consumes_one_level() {
        assert_eq!(Control::Exit { levels: 3 }.unwind(), Control::Exit { levels: 2 });
        assert_eq!(Control::Exit { levels: 1 }.unwind(), Control::None);
        assert_eq!(
            Control::Return(Some(Val::Num(1.0))).unwind(),
            Control::Return(Some(Val::Num(1.0)))
        );
    }
}
