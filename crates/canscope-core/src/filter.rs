//! Acceptance filter rules

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::SessionError;
use crate::frame::{Frame, MAX_EXTENDED_ID, MAX_STANDARD_ID};

/// Identifier width a filter applies to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdType {
    #[default]
    Standard,
    Extended,
}

impl IdType {
    pub fn is_extended(self) -> bool {
        self == IdType::Extended
    }

    fn max_id(self) -> u32 {
        match self {
            IdType::Standard => MAX_STANDARD_ID,
            IdType::Extended => MAX_EXTENDED_ID,
        }
    }
}

impl fmt::Display for IdType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdType::Standard => f.write_str("Standard"),
            IdType::Extended => f.write_str("Extended"),
        }
    }
}

/// An acceptance filter rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum FilterRule {
    /// Accept identifiers where `id & mask == code & mask`
    Mask {
        code: u32,
        mask: u32,
        #[serde(default)]
        id_type: IdType,
    },
    /// Accept identifiers in `from..=to`
    Range {
        from: u32,
        to: u32,
        #[serde(default)]
        id_type: IdType,
    },
}

impl FilterRule {
    pub fn id_type(&self) -> IdType {
        match self {
            FilterRule::Mask { id_type, .. } | FilterRule::Range { id_type, .. } => *id_type,
        }
    }

    /// Check that the rule is internally consistent
    pub fn validate(&self) -> Result<(), SessionError> {
        match *self {
            FilterRule::Mask { .. } => Ok(()),
            FilterRule::Range { from, to, id_type } => {
                if from > to {
                    return Err(SessionError::config(format!(
                        "filter range 0x{:X}..0x{:X} is empty",
                        from, to
                    )));
                }
                if to > id_type.max_id() {
                    return Err(SessionError::config(format!(
                        "filter range end 0x{:X} exceeds {} identifier range",
                        to, id_type
                    )));
                }
                Ok(())
            }
        }
    }

    /// Whether a frame passes this rule. Frames of the other identifier
    /// width never match.
    pub fn matches(&self, frame: &Frame) -> bool {
        if self.id_type().is_extended() != frame.is_extended() {
            return false;
        }
        let id = frame.id();
        match *self {
            FilterRule::Mask { code, mask, .. } => id & mask == code & mask,
            FilterRule::Range { from, to, .. } => (from..=to).contains(&id),
        }
    }
}

impl fmt::Display for FilterRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterRule::Mask {
                code,
                mask,
                id_type,
            } => write!(f, "Mask: acc=0x{:08X}, mask=0x{:08X}, {}", code, mask, id_type),
            FilterRule::Range { from, to, id_type } => {
                write!(f, "Range: 0x{:X}..0x{:X}, {}", from, to, id_type)
            }
        }
    }
}

/// A set of filter rules; an empty set accepts everything
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterSet(Vec<FilterRule>);

impl FilterSet {
    pub fn new(rules: Vec<FilterRule>) -> Self {
        Self(rules)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn rules(&self) -> &[FilterRule] {
        &self.0
    }

    pub fn validate(&self) -> Result<(), SessionError> {
        self.0.iter().try_for_each(FilterRule::validate)
    }

    /// A frame passes when any rule accepts it
    pub fn matches(&self, frame: &Frame) -> bool {
        self.0.is_empty() || self.0.iter().any(|rule| rule.matches(frame))
    }
}

impl From<Vec<FilterRule>> for FilterSet {
    fn from(rules: Vec<FilterRule>) -> Self {
        Self(rules)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn std_frame(id: u32) -> Frame {
        Frame::classic(id, &[], false).unwrap()
    }

    #[test]
    fn mask_rule_matches_masked_bits() {
        let rule = FilterRule::Mask {
            code: 0x100,
            mask: 0x700,
            id_type: IdType::Standard,
        };
        assert!(rule.matches(&std_frame(0x123)));
        assert!(!rule.matches(&std_frame(0x223)));
        assert!(!rule.matches(&Frame::classic(0x123, &[], true).unwrap()));
    }

    #[test]
    fn range_rule_is_inclusive() {
        let rule = FilterRule::Range {
            from: 0x10,
            to: 0x20,
            id_type: IdType::Standard,
        };
        assert!(rule.matches(&std_frame(0x10)));
        assert!(rule.matches(&std_frame(0x20)));
        assert!(!rule.matches(&std_frame(0x21)));
    }

    #[test]
    fn range_validation() {
        let empty = FilterRule::Range {
            from: 5,
            to: 4,
            id_type: IdType::Standard,
        };
        assert!(empty.validate().is_err());
        let wide = FilterRule::Range {
            from: 0,
            to: 0x800,
            id_type: IdType::Standard,
        };
        assert!(wide.validate().is_err());
    }

    #[test]
    fn empty_set_accepts_all() {
        assert!(FilterSet::default().matches(&std_frame(0x7FF)));
        let set = FilterSet::new(vec![FilterRule::Range {
            from: 1,
            to: 1,
            id_type: IdType::Standard,
        }]);
        assert!(!set.matches(&std_frame(2)));
    }

    #[test]
    fn display_format() {
        let rule = FilterRule::Mask {
            code: 0x18DA00F1,
            mask: 0x1FFF00FF,
            id_type: IdType::Extended,
        };
        assert_eq!(
            rule.to_string(),
            "Mask: acc=0x18DA00F1, mask=0x1FFF00FF, Extended"
        );
        let rule = FilterRule::Range {
            from: 0x100,
            to: 0x1FF,
            id_type: IdType::Standard,
        };
        assert_eq!(rule.to_string(), "Range: 0x100..0x1FF, Standard");
    }

    #[test]
    fn deserializes_tagged_rules() {
        let rules: Vec<FilterRule> = serde_json::from_str(
            r#"[{"kind":"mask","code":256,"mask":1792},{"kind":"range","from":1,"to":2,"id_type":"extended"}]"#,
        )
        .unwrap();
        assert_eq!(rules[0].id_type(), IdType::Standard);
        assert_eq!(rules[1].id_type(), IdType::Extended);
    }
}
