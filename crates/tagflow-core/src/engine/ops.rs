use std::rc::Rc;

use super::{Abrupt, Completion, Engine, ErrorKind, Value};
use crate::ast::{BinaryOp, UnaryOp};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hint {
    Default,
    Number,
    String,
}

pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if n == 0.0 {
        return "0".to_string();
    }
    let abs = n.abs();
    if n.fract() == 0.0 && abs < 1e21 {
        return format!("{}", n as i128);
    }
    if abs >= 1e21 || abs < 1e-6 {
        let s = format!("{n:e}");
        return match s.split_once('e') {
            Some((mantissa, exp)) if !exp.starts_with('-') => format!("{mantissa}e+{exp}"),
            _ => s,
        };
    }
    format!("{n}")
}

pub fn string_to_number(s: &str) -> f64 {
    let t = s.trim();
    if t.is_empty() {
        return 0.0;
    }
    match t {
        "Infinity" | "+Infinity" => return f64::INFINITY,
        "-Infinity" => return f64::NEG_INFINITY,
        _ => {}
    }
    if let Some(hex) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        return u64::from_str_radix(hex, 16)
            .map(|v| v as f64)
            .unwrap_or(f64::NAN);
    }
    if !t
        .bytes()
        .all(|b| b.is_ascii_digit() || matches!(b, b'.' | b'e' | b'E' | b'+' | b'-'))
    {
        return f64::NAN;
    }
    t.parse::<f64>().unwrap_or(f64::NAN)
}

pub(crate) fn to_int32(n: f64) -> i32 {
    to_uint32(n) as i32
}

pub(crate) fn to_uint32(n: f64) -> u32 {
    if !n.is_finite() {
        return 0;
    }
    n.trunc().rem_euclid(4_294_967_296.0) as u32
}

impl Engine {
    pub fn to_boolean(&self, v: &Value) -> bool {
        match v {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => !(n.is_nan() || *n == 0.0),
            Value::Str(s) => !s.is_empty(),
            Value::Object(_) | Value::Tagged(_) => true,
        }
    }

    pub fn type_of(&self, v: &Value) -> &'static str {
        match v {
            Value::Undefined => "undefined",
            Value::Null => "object",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Object(id) if self.heap.is_callable(*id) => "function",
            Value::Object(_) | Value::Tagged(_) => "object",
        }
    }

    /// Converts objects through `valueOf`/`toString`. A tagged wrapper is an
    /// opaque object to the host and converts to a fixed string.
    pub fn to_primitive(&mut self, v: &Value, hint: Hint) -> Completion {
        let id = match v {
            Value::Object(id) => *id,
            Value::Tagged(_) => return Ok(Value::str("[object Tagged]")),
            other => return Ok(other.clone()),
        };
        let order: [&str; 2] = if hint == Hint::String {
            ["toString", "valueOf"]
        } else {
            ["valueOf", "toString"]
        };
        let base = Value::Object(id);
        for name in order {
            let f = self.get(&base, name)?;
            if self.is_callable(&f) {
                let r = self.call_function(&f, base.clone(), &[])?;
                if !matches!(r, Value::Object(_) | Value::Tagged(_)) {
                    return Ok(r);
                }
            }
        }
        Err(self.throw(
            ErrorKind::TypeError,
            "Cannot convert object to primitive value",
        ))
    }

    pub fn to_number(&mut self, v: &Value) -> Completion<f64> {
        Ok(match v {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Value::Number(n) => *n,
            Value::Str(s) => string_to_number(s),
            Value::Object(_) | Value::Tagged(_) => {
                let p = self.to_primitive(v, Hint::Number)?;
                return self.to_number(&p);
            }
        })
    }

    pub fn to_string(&mut self, v: &Value) -> Completion<String> {
        Ok(match v {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => number_to_string(*n),
            Value::Str(s) => s.to_string(),
            Value::Object(_) | Value::Tagged(_) => {
                let p = self.to_primitive(v, Hint::String)?;
                return self.to_string(&p);
            }
        })
    }

    pub fn to_property_key(&mut self, v: &Value) -> Completion<String> {
        self.to_string(v)
    }

    pub fn strict_equals(&self, a: &Value, b: &Value) -> bool {
        match (a, b) {
            (Value::Number(x), Value::Number(y)) => x == y,
            _ => a.same_value(b),
        }
    }

    pub fn loose_equals(&mut self, a: &Value, b: &Value) -> Completion<bool> {
        Ok(match (a, b) {
            (Value::Undefined | Value::Null, Value::Undefined | Value::Null) => true,
            (Value::Undefined | Value::Null, _) | (_, Value::Undefined | Value::Null) => false,
            (Value::Number(_), Value::Str(_)) | (Value::Str(_), Value::Number(_)) => {
                self.to_number(a)? == self.to_number(b)?
            }
            (Value::Bool(_), _) => {
                let n = Value::Number(self.to_number(a)?);
                return self.loose_equals(&n, b);
            }
            (_, Value::Bool(_)) => {
                let n = Value::Number(self.to_number(b)?);
                return self.loose_equals(a, &n);
            }
            (Value::Object(_) | Value::Tagged(_), Value::Object(_) | Value::Tagged(_)) => {
                self.strict_equals(a, b)
            }
            (Value::Object(_) | Value::Tagged(_), _) => {
                let p = self.to_primitive(a, Hint::Default)?;
                return self.loose_equals(&p, b);
            }
            (_, Value::Object(_) | Value::Tagged(_)) => {
                let p = self.to_primitive(b, Hint::Default)?;
                return self.loose_equals(a, &p);
            }
            _ => self.strict_equals(a, b),
        })
    }

    /// `a < b`; `None` when either side is NaN.
    fn less_than(&mut self, a: &Value, b: &Value) -> Completion<Option<bool>> {
        let pa = self.to_primitive(a, Hint::Number)?;
        let pb = self.to_primitive(b, Hint::Number)?;
        if let (Value::Str(x), Value::Str(y)) = (&pa, &pb) {
            let ux: Vec<u16> = x.encode_utf16().collect();
            let uy: Vec<u16> = y.encode_utf16().collect();
            return Ok(Some(ux < uy));
        }
        let x = self.to_number(&pa)?;
        let y = self.to_number(&pb)?;
        if x.is_nan() || y.is_nan() {
            return Ok(None);
        }
        Ok(Some(x < y))
    }

    pub fn unary_op(&mut self, op: UnaryOp, v: &Value) -> Completion {
        Ok(match op {
            UnaryOp::Minus => Value::Number(-self.to_number(v)?),
            UnaryOp::Plus => Value::Number(self.to_number(v)?),
            UnaryOp::Not => Value::Bool(!self.to_boolean(v)),
            UnaryOp::BitNot => Value::Number(!to_int32(self.to_number(v)?) as f64),
            UnaryOp::Typeof => Value::str(self.type_of(v)),
            UnaryOp::Void => Value::Undefined,
            UnaryOp::Delete => {
                return Err(Abrupt::Fatal(anyhow::anyhow!(
                    "delete needs a property reference"
                )))
            }
        })
    }

    pub fn binary_op(&mut self, op: BinaryOp, a: &Value, b: &Value) -> Completion {
        let num = |n: f64| -> Completion { Ok(Value::Number(n)) };
        match op {
            BinaryOp::Add => {
                let pa = self.to_primitive(a, Hint::Default)?;
                let pb = self.to_primitive(b, Hint::Default)?;
                if matches!(pa, Value::Str(_)) || matches!(pb, Value::Str(_)) {
                    let mut s = self.to_string(&pa)?;
                    s.push_str(&self.to_string(&pb)?);
                    return Ok(Value::Str(Rc::from(s)));
                }
                num(self.to_number(&pa)? + self.to_number(&pb)?)
            }
            BinaryOp::Sub => num(self.to_number(a)? - self.to_number(b)?),
            BinaryOp::Mul => num(self.to_number(a)? * self.to_number(b)?),
            BinaryOp::Div => num(self.to_number(a)? / self.to_number(b)?),
            BinaryOp::Rem => num(self.to_number(a)? % self.to_number(b)?),
            BinaryOp::BitAnd => {
                num((to_int32(self.to_number(a)?) & to_int32(self.to_number(b)?)) as f64)
            }
            BinaryOp::BitOr => {
                num((to_int32(self.to_number(a)?) | to_int32(self.to_number(b)?)) as f64)
            }
            BinaryOp::BitXor => {
                num((to_int32(self.to_number(a)?) ^ to_int32(self.to_number(b)?)) as f64)
            }
            BinaryOp::Shl => {
                let x = to_int32(self.to_number(a)?);
                let s = to_uint32(self.to_number(b)?) & 31;
                num(x.wrapping_shl(s) as f64)
            }
            BinaryOp::Shr => {
                let x = to_int32(self.to_number(a)?);
                let s = to_uint32(self.to_number(b)?) & 31;
                num((x >> s) as f64)
            }
            BinaryOp::UShr => {
                let x = to_uint32(self.to_number(a)?);
                let s = to_uint32(self.to_number(b)?) & 31;
                num((x >> s) as f64)
            }
            BinaryOp::Eq => Ok(Value::Bool(self.loose_equals(a, b)?)),
            BinaryOp::NotEq => Ok(Value::Bool(!self.loose_equals(a, b)?)),
            BinaryOp::StrictEq => Ok(Value::Bool(self.strict_equals(a, b))),
            BinaryOp::StrictNotEq => Ok(Value::Bool(!self.strict_equals(a, b))),
            BinaryOp::Lt => Ok(Value::Bool(self.less_than(a, b)? == Some(true))),
            BinaryOp::Gt => Ok(Value::Bool(self.less_than(b, a)? == Some(true))),
            BinaryOp::LtEq => Ok(Value::Bool(self.less_than(b, a)? == Some(false))),
            BinaryOp::GtEq => Ok(Value::Bool(self.less_than(a, b)? == Some(false))),
            BinaryOp::In => {
                let Value::Object(id) = b else {
                    return Err(self.throw(
                        ErrorKind::TypeError,
                        "Cannot use 'in' operator to search in a non-object",
                    ));
                };
                let id = *id;
                let key = self.to_property_key(a)?;
                Ok(Value::Bool(self.has_property(id, &key)))
            }
            BinaryOp::Instanceof => {
                if !self.is_callable(b) {
                    return Err(self.throw(
                        ErrorKind::TypeError,
                        "Right-hand side of 'instanceof' is not callable",
                    ));
                }
                let Value::Object(mut cur) = a.clone() else {
                    return Ok(Value::Bool(false));
                };
                let Value::Object(proto) = self.get(b, "prototype")? else {
                    return Err(self.throw(
                        ErrorKind::TypeError,
                        "Function has non-object prototype in instanceof check",
                    ));
                };
                while let Some(next) = self.heap.get(cur).proto {
                    if next == proto {
                        return Ok(Value::Bool(true));
                    }
                    cur = next;
                }
                Ok(Value::Bool(false))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_print_like_the_host_language() {
        assert_eq!(number_to_string(3.0), "3");
        assert_eq!(number_to_string(-0.0), "0");
        assert_eq!(number_to_string(0.1 + 0.2), "0.30000000000000004");
        assert_eq!(number_to_string(1e21), "1e+21");
        assert_eq!(number_to_string(1.5e-7), "1.5e-7");
        assert_eq!(number_to_string(f64::NAN), "NaN");
        assert_eq!(number_to_string(f64::NEG_INFINITY), "-Infinity");
    }

    #[test]
    fn strings_convert_to_numbers() {
        assert_eq!(string_to_number("  42 "), 42.0);
        assert_eq!(string_to_number(""), 0.0);
        assert_eq!(string_to_number("0x1f"), 31.0);
        assert!(string_to_number("inf").is_nan());
        assert!(string_to_number("12px").is_nan());
        assert_eq!(string_to_number("-Infinity"), f64::NEG_INFINITY);
    }

    #[test]
    fn int32_wraps() {
        assert_eq!(to_int32(4_294_967_297.0), 1);
        assert_eq!(to_int32(-1.0), -1);
        assert_eq!(to_uint32(-1.0), u32::MAX);
        assert_eq!(to_int32(f64::NAN), 0);
    }

    #[test]
    fn loose_equality_coerces() {
        let mut engine = Engine::default();
        assert!(engine
            .loose_equals(&Value::Null, &Value::Undefined)
            .expect("eq"));
        assert!(engine
            .loose_equals(&Value::str("1"), &Value::Number(1.0))
            .expect("eq"));
        assert!(engine
            .loose_equals(&Value::Bool(true), &Value::str("1"))
            .expect("eq"));
        assert!(!engine
            .loose_equals(&Value::Null, &Value::Number(0.0))
            .expect("eq"));
    }
}
