use crate::value::{Kwargs, Value};

/// Operators callable by qualified name without serializing a callable.
///
/// Tensor/scalar operands broadcast elementwise; tensor/tensor operands
/// must have equal length. Integer arithmetic stays integral except for
/// `aten::div`, which always produces floats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinOp {
    Add,
    Sub,
    Mul,
    Div,
    Neg,
    Relu,
    Ones,
    Min,
    Max,
}

type OpResult = std::result::Result<Value, String>;

impl BuiltinOp {
    const ALL: [BuiltinOp; 9] = [
        BuiltinOp::Add,
        BuiltinOp::Sub,
        BuiltinOp::Mul,
        BuiltinOp::Div,
        BuiltinOp::Neg,
        BuiltinOp::Relu,
        BuiltinOp::Ones,
        BuiltinOp::Min,
        BuiltinOp::Max,
    ];

    /// Resolve a qualified name such as `aten::add`.
    pub fn from_qualified_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.qualified_name() == name)
    }

    pub fn qualified_name(self) -> &'static str {
        match self {
            BuiltinOp::Add => "aten::add",
            BuiltinOp::Sub => "aten::sub",
            BuiltinOp::Mul => "aten::mul",
            BuiltinOp::Div => "aten::div",
            BuiltinOp::Neg => "aten::neg",
            BuiltinOp::Relu => "aten::relu",
            BuiltinOp::Ones => "aten::ones",
            BuiltinOp::Min => "builtins::min",
            BuiltinOp::Max => "builtins::max",
        }
    }

    /// Run the operator.
    pub fn invoke(self, args: &[Value], kwargs: &Kwargs) -> OpResult {
        let name = self.qualified_name();
        match self {
            BuiltinOp::Add | BuiltinOp::Sub => {
                check_kwargs(name, kwargs, &["alpha"])?;
                let [lhs, rhs] = positional::<2>(name, args)?;
                let rhs = match kwargs.get("alpha") {
                    Some(alpha) => binary(name, rhs, alpha, Some(i64::checked_mul), |a, b| a * b)?,
                    None => rhs.clone(),
                };
                if self == BuiltinOp::Add {
                    binary(name, lhs, &rhs, Some(i64::checked_add), |a, b| a + b)
                } else {
                    binary(name, lhs, &rhs, Some(i64::checked_sub), |a, b| a - b)
                }
            }
            BuiltinOp::Mul => {
                check_kwargs(name, kwargs, &[])?;
                let [lhs, rhs] = positional::<2>(name, args)?;
                binary(name, lhs, rhs, Some(i64::checked_mul), |a, b| a * b)
            }
            BuiltinOp::Div => {
                check_kwargs(name, kwargs, &[])?;
                let [lhs, rhs] = positional::<2>(name, args)?;
                binary(name, lhs, rhs, None, |a, b| a / b)
            }
            BuiltinOp::Neg => {
                check_kwargs(name, kwargs, &[])?;
                let [x] = positional::<1>(name, args)?;
                unary(name, x, i64::checked_neg, |a| -a)
            }
            BuiltinOp::Relu => {
                check_kwargs(name, kwargs, &[])?;
                let [x] = positional::<1>(name, args)?;
                unary(name, x, |a| Some(a.max(0)), |a| a.max(0.0))
            }
            BuiltinOp::Ones => {
                check_kwargs(name, kwargs, &[])?;
                ones(name, args)
            }
            BuiltinOp::Min => {
                check_kwargs(name, kwargs, &[])?;
                extremum(name, args, |candidate, best| candidate < best)
            }
            BuiltinOp::Max => {
                check_kwargs(name, kwargs, &[])?;
                extremum(name, args, |candidate, best| candidate > best)
            }
        }
    }
}

fn check_kwargs(name: &str, kwargs: &Kwargs, allowed: &[&str]) -> std::result::Result<(), String> {
    match kwargs.keys().find(|k| !allowed.contains(&k.as_str())) {
        Some(k) => Err(format!("{name} got an unexpected keyword argument '{k}'")),
        None => Ok(()),
    }
}

fn positional<'a, const N: usize>(
    name: &str,
    args: &'a [Value],
) -> std::result::Result<[&'a Value; N], String> {
    if args.len() != N {
        return Err(format!(
            "{name} expects {N} positional argument(s), got {}",
            args.len()
        ));
    }
    Ok(std::array::from_fn(|i| &args[i]))
}

fn scalar(name: &str, v: &Value) -> std::result::Result<f64, String> {
    v.as_f64()
        .ok_or_else(|| format!("{name}: expected a number or tensor, got {}", v.type_name()))
}

fn binary(
    name: &str,
    lhs: &Value,
    rhs: &Value,
    int_op: Option<fn(i64, i64) -> Option<i64>>,
    float_op: fn(f64, f64) -> f64,
) -> OpResult {
    match (lhs, rhs) {
        (Value::Tensor(a), Value::Tensor(b)) => {
            if a.len() != b.len() {
                return Err(format!(
                    "{name}: tensor lengths differ ({} vs {})",
                    a.len(),
                    b.len()
                ));
            }
            Ok(Value::Tensor(
                a.iter().zip(b).map(|(x, y)| float_op(*x, *y)).collect(),
            ))
        }
        (Value::Tensor(a), s) => {
            let s = scalar(name, s)?;
            Ok(Value::Tensor(a.iter().map(|x| float_op(*x, s)).collect()))
        }
        (s, Value::Tensor(b)) => {
            let s = scalar(name, s)?;
            Ok(Value::Tensor(b.iter().map(|y| float_op(s, *y)).collect()))
        }
        (Value::Int(a), Value::Int(b)) if int_op.is_some() => int_op
            .and_then(|op| op(*a, *b))
            .map(Value::Int)
            .ok_or_else(|| format!("{name}: integer overflow")),
        (a, b) => Ok(Value::Float(float_op(scalar(name, a)?, scalar(name, b)?))),
    }
}

fn unary(name: &str, x: &Value, int_op: fn(i64) -> Option<i64>, float_op: fn(f64) -> f64) -> OpResult {
    match x {
        Value::Tensor(t) => Ok(Value::Tensor(t.iter().map(|v| float_op(*v)).collect())),
        Value::Int(i) => int_op(*i)
            .map(Value::Int)
            .ok_or_else(|| format!("{name}: integer overflow")),
        other => Ok(Value::Float(float_op(scalar(name, other)?))),
    }
}

/// `aten::ones(d0, d1, ...)`: a tensor of ones with `d0 * d1 * ...` elements.
fn ones(name: &str, args: &[Value]) -> OpResult {
    if args.is_empty() {
        return Err(format!("{name} expects at least one dimension"));
    }
    let mut numel: usize = 1;
    for arg in args {
        let dim = arg
            .as_i64()
            .filter(|d| *d >= 0)
            .ok_or_else(|| format!("{name}: dimensions must be non-negative ints"))?;
        numel = usize::try_from(dim)
            .ok()
            .and_then(|d| numel.checked_mul(d))
            .ok_or_else(|| format!("{name}: tensor too large"))?;
    }
    Ok(Value::Tensor(vec![1.0; numel]))
}

/// `builtins::min` / `builtins::max` over scalar arguments, or over the
/// elements of a single tensor argument.
fn extremum(name: &str, args: &[Value], better: fn(f64, f64) -> bool) -> OpResult {
    if let [Value::Tensor(t)] = args {
        return t
            .iter()
            .copied()
            .reduce(|best, x| if better(x, best) { x } else { best })
            .map(Value::Float)
            .ok_or_else(|| format!("{name}: empty tensor"));
    }

    let mut best: Option<&Value> = None;
    for arg in args {
        let candidate = scalar(name, arg)?;
        let replace = match best {
            Some(b) => better(candidate, scalar(name, b)?),
            None => true,
        };
        if replace {
            best = Some(arg);
        }
    }
    best.cloned()
        .ok_or_else(|| format!("{name} expects at least one argument"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, args: Vec<Value>) -> OpResult {
        BuiltinOp::from_qualified_name(name)
            .unwrap()
            .invoke(&args, &Kwargs::new())
    }

    #[test]
    fn test_lookup_by_qualified_name() {
        assert_eq!(BuiltinOp::from_qualified_name("aten::add"), Some(BuiltinOp::Add));
        assert_eq!(BuiltinOp::from_qualified_name("builtins::max"), Some(BuiltinOp::Max));
        assert_eq!(BuiltinOp::from_qualified_name("aten::matmul"), None);
        assert_eq!(BuiltinOp::from_qualified_name(""), None);
        for op in BuiltinOp::ALL {
            assert_eq!(BuiltinOp::from_qualified_name(op.qualified_name()), Some(op));
        }
    }

    #[test]
    fn test_add_tensor_scalar_broadcast() {
        let out = call("aten::add", vec![Value::Tensor(vec![1.0, 1.0]), Value::Int(3)]).unwrap();
        assert_eq!(out, Value::Tensor(vec![4.0, 4.0]));
    }

    #[test]
    fn test_add_with_alpha() {
        let mut kwargs = Kwargs::new();
        kwargs.insert("alpha".into(), Value::Int(2));
        let out = BuiltinOp::Add
            .invoke(&[Value::Int(1), Value::Int(3)], &kwargs)
            .unwrap();
        assert_eq!(out, Value::Int(7));

        let out = BuiltinOp::Sub
            .invoke(&[Value::Tensor(vec![10.0]), Value::Tensor(vec![1.0])], &kwargs)
            .unwrap();
        assert_eq!(out, Value::Tensor(vec![8.0]));
    }

    #[test]
    fn test_int_and_float_arithmetic() {
        assert_eq!(call("aten::mul", vec![Value::Int(6), Value::Int(7)]), Ok(Value::Int(42)));
        assert_eq!(
            call("aten::mul", vec![Value::Int(2), Value::Float(0.5)]),
            Ok(Value::Float(1.0))
        );
        assert_eq!(call("aten::div", vec![Value::Int(7), Value::Int(2)]), Ok(Value::Float(3.5)));
        assert_eq!(call("aten::sub", vec![Value::Int(1), Value::Int(3)]), Ok(Value::Int(-2)));
    }

    #[test]
    fn test_tensor_length_mismatch() {
        let err = call(
            "aten::add",
            vec![Value::Tensor(vec![1.0]), Value::Tensor(vec![1.0, 2.0])],
        )
        .unwrap_err();
        assert!(err.contains("lengths differ"));
    }

    #[test]
    fn test_unary_ops() {
        assert_eq!(call("aten::neg", vec![Value::Int(5)]), Ok(Value::Int(-5)));
        assert_eq!(
            call("aten::relu", vec![Value::Tensor(vec![-1.0, 0.5])]),
            Ok(Value::Tensor(vec![0.0, 0.5]))
        );
        assert_eq!(call("aten::relu", vec![Value::Int(-3)]), Ok(Value::Int(0)));
    }

    #[test]
    fn test_ones() {
        assert_eq!(
            call("aten::ones", vec![Value::Int(2), Value::Int(3)]),
            Ok(Value::Tensor(vec![1.0; 6]))
        );
        assert!(call("aten::ones", vec![Value::Int(-1)]).is_err());
        assert!(call("aten::ones", vec![]).is_err());
    }

    #[test]
    fn test_min_max() {
        assert_eq!(
            call("builtins::min", vec![Value::Int(3), Value::Float(1.5), Value::Int(2)]),
            Ok(Value::Float(1.5))
        );
        assert_eq!(
            call("builtins::max", vec![Value::Int(3), Value::Int(9)]),
            Ok(Value::Int(9))
        );
        assert_eq!(
            call("builtins::max", vec![Value::Tensor(vec![1.0, 4.0, 2.0])]),
            Ok(Value::Float(4.0))
        );
        assert!(call("builtins::min", vec![]).is_err());
    }

    #[test]
    fn test_bad_arguments() {
        assert!(call("aten::add", vec![Value::Int(1)]).is_err());
        assert!(call("aten::add", vec![Value::Str("a".into()), Value::Int(1)]).is_err());

        let mut kwargs = Kwargs::new();
        kwargs.insert("beta".into(), Value::Int(1));
        let err = BuiltinOp::Mul
            .invoke(&[Value::Int(1), Value::Int(2)], &kwargs)
            .unwrap_err();
        assert!(err.contains("beta"));
    }

    #[test]
    fn test_integer_overflow_reported() {
        let err = call("aten::add", vec![Value::Int(i64::MAX), Value::Int(1)]).unwrap_err();
        assert!(err.contains("overflow"));
    }
}
