use super::FIRMWARE_TYPED_VARIABLES;
use crate::protocol::error::Error;
use std::{fmt, str::FromStr};

/// Numeric quantity stored in a module.
///
/// Indices are 1-based, as printed on the module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Variable {
    /// Variable 1..=12
    Var(u8),
    /// Regulator setpoint 1..=2
    Setpoint(u8),
    /// Threshold `index` (1..=5) of register `register` (1..=4)
    Threshold { register: u8, index: u8 },
    /// S0 counter input 1..=4
    S0Input(u8),
}

impl Variable {
    pub fn is_valid(&self) -> bool {
        match *self {
            Variable::Var(n) => (1..=12).contains(&n),
            Variable::Setpoint(n) => (1..=2).contains(&n),
            Variable::Threshold { register, index } => {
                (1..=4).contains(&register) && (1..=5).contains(&index)
            }
            Variable::S0Input(n) => (1..=4).contains(&n),
        }
    }

    /// Whether the module states the variable kind in its status response.
    ///
    /// Older firmware answers some requests with the bare value, so only one
    /// such request may be outstanding at a time.
    pub fn has_type_in_response(&self, firmware_version: u32) -> bool {
        if firmware_version >= FIRMWARE_TYPED_VARIABLES {
            return true;
        }
        !matches!(
            *self,
            Variable::Var(1..=3) | Variable::Setpoint(_) | Variable::Threshold { register: 1, .. }
        )
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variable::Var(n) => write!(f, "var{n}"),
            Variable::Setpoint(n) => write!(f, "setpoint{n}"),
            Variable::Threshold { register, index } => write!(f, "threshold{register}.{index}"),
            Variable::S0Input(n) => write!(f, "s0:{n}"),
        }
    }
}

impl FromStr for Variable {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::ErrInvalidVariable(s.to_string());
        let lower = s.trim().to_ascii_lowercase();
        let number = |rest: &str| rest.parse::<u8>().map_err(|_| invalid());

        let variable = if let Some(rest) = lower.strip_prefix("setpoint") {
            Variable::Setpoint(number(rest)?)
        } else if let Some(rest) = lower.strip_prefix("threshold") {
            let (register, index) = rest.split_once('.').ok_or_else(invalid)?;
            Variable::Threshold {
                register: number(register)?,
                index: number(index)?,
            }
        } else if let Some(rest) = lower.strip_prefix("s0:") {
            Variable::S0Input(number(rest)?)
        } else if let Some(rest) = lower.strip_prefix("var") {
            Variable::Var(number(rest)?)
        } else {
            return Err(invalid());
        };

        if variable.is_valid() {
            Ok(variable)
        } else {
            Err(invalid())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_config_names() {
        assert_eq!("var1".parse::<Variable>().unwrap(), Variable::Var(1));
        assert_eq!("Setpoint2".parse::<Variable>().unwrap(), Variable::Setpoint(2));
        assert_eq!(
            "threshold3.4".parse::<Variable>().unwrap(),
            Variable::Threshold {
                register: 3,
                index: 4
            }
        );
        assert_eq!("s0:1".parse::<Variable>().unwrap(), Variable::S0Input(1));
    }

    #[test]
    fn rejects_out_of_range() {
        assert!("var13".parse::<Variable>().is_err());
        assert!("setpoint0".parse::<Variable>().is_err());
        assert!("threshold5.1".parse::<Variable>().is_err());
        assert!("counter1".parse::<Variable>().is_err());
    }

    #[test]
    fn old_firmware_answers_without_type() {
        let old = 0x160000;
        assert!(!Variable::Var(1).has_type_in_response(old));
        assert!(!Variable::Setpoint(2).has_type_in_response(old));
        assert!(Variable::Var(4).has_type_in_response(old));
        assert!(Variable::Var(1).has_type_in_response(FIRMWARE_TYPED_VARIABLES));
    }

    #[test]
    fn display_round_trips_through_from_str() {
        let v = Variable::Threshold {
            register: 2,
            index: 5,
        };
        assert_eq!(v.to_string().parse::<Variable>().unwrap(), v);
    }
}
