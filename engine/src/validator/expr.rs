//! Custom validator expressions attached to template fields
//!
//! Expressions are parsed once when directions are loaded:
//!
//! - `regex:<pattern>`: the whole value must match
//! - `range:<min>..<max>`: inclusive numeric bounds, either side optional
//! - `minlen:<n>` / `maxlen:<n>`: character count of the rendered value

use regex::Regex;
use std::fmt;
use std::str::FromStr;

use super::FieldValue;

#[derive(Debug, Clone)]
pub enum ValidatorExpr {
    Regex(Regex),
    Range { min: Option<f64>, max: Option<f64> },
    MinLen(usize),
    MaxLen(usize),
}

impl ValidatorExpr {
    /// Whether the expression can be applied to numbers only
    pub fn is_numeric(&self) -> bool {
        matches!(self, ValidatorExpr::Range { .. })
    }

    /// Check a typed value, returning a human readable rejection.
    pub fn check(&self, value: &FieldValue) -> Result<(), String> {
        match self {
            ValidatorExpr::Regex(re) => {
                let rendered = value.to_string();
                if re.is_match(&rendered) {
                    Ok(())
                } else {
                    Err("value has an unexpected format".to_string())
                }
            }
            ValidatorExpr::Range { min, max } => {
                let n = value
                    .as_number()
                    .ok_or_else(|| "expected a number".to_string())?;
                if let Some(min) = min {
                    if n < *min {
                        return Err(format!("must be at least {}", min));
                    }
                }
                if let Some(max) = max {
                    if n > *max {
                        return Err(format!("must be at most {}", max));
                    }
                }
                Ok(())
            }
            ValidatorExpr::MinLen(limit) => {
                let len = value.to_string().chars().count();
                if len < *limit {
                    Err(format!("must be at least {} characters", limit))
                } else {
                    Ok(())
                }
            }
            ValidatorExpr::MaxLen(limit) => {
                let len = value.to_string().chars().count();
                if len > *limit {
                    Err(format!("must be at most {} characters", limit))
                } else {
                    Ok(())
                }
            }
        }
    }
}

impl FromStr for ValidatorExpr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, arg) = s
            .split_once(':')
            .ok_or_else(|| format!("validator '{}' must look like kind:argument", s))?;

        match kind.trim() {
            "regex" => Regex::new(&format!("^(?:{})$", arg))
                .map(ValidatorExpr::Regex)
                .map_err(|e| format!("invalid regex '{}': {}", arg, e)),
            "range" => {
                let (lo, hi) = arg
                    .split_once("..")
                    .ok_or_else(|| format!("range '{}' must look like min..max", arg))?;
                let min = parse_bound(lo)?;
                let max = parse_bound(hi)?;
                if let (Some(min), Some(max)) = (min, max) {
                    if min > max {
                        return Err(format!("range '{}' has min greater than max", arg));
                    }
                }
                Ok(ValidatorExpr::Range { min, max })
            }
            "minlen" => parse_len(arg).map(ValidatorExpr::MinLen),
            "maxlen" => parse_len(arg).map(ValidatorExpr::MaxLen),
            other => Err(format!("unknown validator kind '{}'", other)),
        }
    }
}

fn parse_bound(s: &str) -> Result<Option<f64>, String> {
    let s = s.trim();
    if s.is_empty() {
        return Ok(None);
    }
    s.parse::<f64>()
        .map(Some)
        .map_err(|_| format!("'{}' is not a number", s))
}

fn parse_len(s: &str) -> Result<usize, String> {
    s.trim()
        .parse::<usize>()
        .map_err(|_| format!("'{}' is not a length", s))
}

impl fmt::Display for ValidatorExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidatorExpr::Regex(re) => {
                // stored anchored as ^(?:pattern)$
                let src = re.as_str();
                let inner = src
                    .strip_prefix("^(?:")
                    .and_then(|s| s.strip_suffix(")$"))
                    .unwrap_or(src);
                write!(f, "regex:{}", inner)
            }
            ValidatorExpr::Range { min, max } => {
                let lo = min.map(|v| v.to_string()).unwrap_or_default();
                let hi = max.map(|v| v.to_string()).unwrap_or_default();
                write!(f, "range:{}..{}", lo, hi)
            }
            ValidatorExpr::MinLen(n) => write!(f, "minlen:{}", n),
            ValidatorExpr::MaxLen(n) => write!(f, "maxlen:{}", n),
        }
    }
}

impl PartialEq for ValidatorExpr {
    fn eq(&self, other: &Self) -> bool {
        self.to_string() == other.to_string()
    }
}
