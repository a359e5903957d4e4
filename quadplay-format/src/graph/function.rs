use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::LazyLock;

use super::value::GraphValue;

#[derive(Clone, Copy)]
enum Op {
    Unary(fn(f64) -> f64),
    Binary(fn(f64, f64) -> f64),
    Variadic(fn(&[f64]) -> f64),
}

/// A named builtin numeric function.
///
/// Builtins are the only functions the wire format can carry; they travel
/// by name.
pub struct Builtin {
    name: &'static str,
    op: Op,
}

impl Builtin {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Calls with JavaScript argument rules: missing arguments are `NaN`.
    pub fn call(&self, args: &[f64]) -> f64 {
        let arg = |i: usize| args.get(i).copied().unwrap_or(f64::NAN);
        match self.op {
            Op::Unary(f) => f(arg(0)),
            Op::Binary(f) => f(arg(0), arg(1)),
            Op::Variadic(f) => f(args),
        }
    }
}

impl fmt::Debug for Builtin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

fn js_round(x: f64) -> f64 {
    // Halves round towards positive infinity
    let floor = x.floor();
    if x - floor >= 0.5 { floor + 1.0 } else { floor }
}

fn js_sign(x: f64) -> f64 {
    if x == 0.0 || x.is_nan() { x } else { x.signum() }
}

fn js_max(args: &[f64]) -> f64 {
    args.iter().try_fold(f64::NEG_INFINITY, |acc, &x| {
        if x.is_nan() { None } else { Some(acc.max(x)) }
    })
    .unwrap_or(f64::NAN)
}

fn js_min(args: &[f64]) -> f64 {
    args.iter().try_fold(f64::INFINITY, |acc, &x| {
        if x.is_nan() { None } else { Some(acc.min(x)) }
    })
    .unwrap_or(f64::NAN)
}

fn js_hypot(args: &[f64]) -> f64 {
    args.iter().map(|x| x * x).sum::<f64>().sqrt()
}

static BUILTINS: &[Builtin] = &[
    Builtin { name: "Math.abs", op: Op::Unary(f64::abs) },
    Builtin { name: "Math.acos", op: Op::Unary(f64::acos) },
    Builtin { name: "Math.asin", op: Op::Unary(f64::asin) },
    Builtin { name: "Math.atan", op: Op::Unary(f64::atan) },
    Builtin { name: "Math.atan2", op: Op::Binary(f64::atan2) },
    Builtin { name: "Math.cbrt", op: Op::Unary(f64::cbrt) },
    Builtin { name: "Math.ceil", op: Op::Unary(f64::ceil) },
    Builtin { name: "Math.cos", op: Op::Unary(f64::cos) },
    Builtin { name: "Math.exp", op: Op::Unary(f64::exp) },
    Builtin { name: "Math.floor", op: Op::Unary(f64::floor) },
    Builtin { name: "Math.hypot", op: Op::Variadic(js_hypot) },
    Builtin { name: "Math.log", op: Op::Unary(f64::ln) },
    Builtin { name: "Math.log10", op: Op::Unary(f64::log10) },
    Builtin { name: "Math.log2", op: Op::Unary(f64::log2) },
    Builtin { name: "Math.max", op: Op::Variadic(js_max) },
    Builtin { name: "Math.min", op: Op::Variadic(js_min) },
    Builtin { name: "Math.pow", op: Op::Binary(f64::powf) },
    Builtin { name: "Math.round", op: Op::Unary(js_round) },
    Builtin { name: "Math.sign", op: Op::Unary(js_sign) },
    Builtin { name: "Math.sin", op: Op::Unary(f64::sin) },
    Builtin { name: "Math.sqrt", op: Op::Unary(f64::sqrt) },
    Builtin { name: "Math.tan", op: Op::Unary(f64::tan) },
    Builtin { name: "Math.trunc", op: Op::Unary(f64::trunc) },
];

/// Lookup table for the builtin functions, by wire name.
pub struct BuiltinRegistry {
    by_name: HashMap<&'static str, &'static Builtin>,
}

static REGISTRY: LazyLock<BuiltinRegistry> = LazyLock::new(|| BuiltinRegistry {
    by_name: BUILTINS.iter().map(|b| (b.name, b)).collect(),
});

impl BuiltinRegistry {
    pub fn global() -> &'static BuiltinRegistry {
        &REGISTRY
    }

    pub fn lookup(&self, name: &str) -> Option<&'static Builtin> {
        self.by_name.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &'static Builtin> {
        BUILTINS.iter()
    }
}

/// A callable graph value.
#[derive(Clone)]
pub enum Function {
    Builtin(&'static Builtin),
    /// A Rust closure. Usable in a graph, but never encodable.
    Closure {
        name: String,
        f: Rc<dyn Fn(&[GraphValue]) -> GraphValue>,
    },
}

impl Function {
    /// Looks up a builtin by wire name, e.g. `"Math.sin"`.
    pub fn builtin(name: &str) -> Option<Function> {
        BuiltinRegistry::global().lookup(name).map(Function::Builtin)
    }

    pub fn closure(name: impl Into<String>, f: impl Fn(&[GraphValue]) -> GraphValue + 'static) -> Function {
        Function::Closure {
            name: name.into(),
            f: Rc::new(f),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Function::Builtin(b) => b.name,
            Function::Closure { name, .. } => name,
        }
    }

    pub fn call(&self, args: &[GraphValue]) -> GraphValue {
        match self {
            Function::Builtin(b) => {
                let args: Vec<f64> = args.iter().map(|a| a.as_f64().unwrap_or(f64::NAN)).collect();
                GraphValue::Number(b.call(&args))
            }
            Function::Closure { f, .. } => f(args),
        }
    }

    pub fn same(&self, other: &Function) -> bool {
        match (self, other) {
            (Function::Builtin(a), Function::Builtin(b)) => std::ptr::eq(*a, *b),
            (Function::Closure { f: a, .. }, Function::Closure { f: b, .. }) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Function::Builtin(b) => write!(f, "Builtin({})", b.name),
            Function::Closure { name, .. } => write!(f, "Closure({name})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_name() {
        let sin = Function::builtin("Math.sin").unwrap();
        assert_eq!(sin.name(), "Math.sin");
        assert!(sin.same(&Function::builtin("Math.sin").unwrap()));
        assert!(Function::builtin("Math.nope").is_none());
        assert_eq!(BuiltinRegistry::global().iter().count(), BUILTINS.len());
    }

    #[test]
    fn javascript_semantics() {
        let call = |name: &str, args: &[f64]| Function::builtin(name).unwrap()
            .call(&args.iter().map(|&n| GraphValue::from(n)).collect::<Vec<_>>())
            .as_f64()
            .unwrap();

        assert_eq!(call("Math.round", &[2.5]), 3.0);
        assert_eq!(call("Math.round", &[-2.5]), -2.0);
        assert_eq!(call("Math.max", &[]), f64::NEG_INFINITY);
        assert_eq!(call("Math.min", &[3.0, 1.0, 2.0]), 1.0);
        assert!(call("Math.max", &[1.0, f64::NAN]).is_nan());
        assert_eq!(call("Math.sign", &[0.0]), 0.0);
        assert_eq!(call("Math.hypot", &[3.0, 4.0]), 5.0);
        assert!(call("Math.sqrt", &[]).is_nan());
    }

    #[test]
    fn closures_compare_by_handle() {
        let double = Function::closure("double", |args| {
            GraphValue::Number(args[0].as_f64().unwrap_or(0.0) * 2.0)
        });
        assert!(double.same(&double.clone()));
        assert_eq!(double.call(&[GraphValue::from(4.0)]).as_f64(), Some(8.0));
        assert!(!double.same(&Function::closure("double", |_| GraphValue::Null)));
    }
}
