//! Custom operation model.
//!
//! Sampling, scoring and sub-program invocation are graph nodes of kind
//! [`OpKind`]. Each bound node carries four rules and a piece of call-site
//! metadata, the [`Elaboration`]. Interpreters pattern-match on the kind and
//! read the elaboration; plain re-execution only ever calls `execute`.
//!
//! ```text
//! define_operation("clip")  ─> OpKind::User
//! RuleSet::new().execute(..).infer_shapes(..).batch(..).differentiate(..)
//! kind.bind(rules, elaboration) ─> CustomOp   (MissingRule if incomplete)
//! ```

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use stoch_foundation::{Address, Value};

use crate::error::{IrError, Result};
use crate::graph::Aval;

static NEXT_USER_KIND: AtomicU64 = AtomicU64::new(0);

/// Kind of a custom node.
///
/// Two bound nodes are equal exactly when their kinds are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OpKind {
    /// Draw a value from a sampler.
    Assume,
    /// Compute a log density without affecting the score.
    LogDensity,
    /// Add a log density to the running score.
    Observe,
    /// Invoke a sub-program at an address.
    Trace,
    /// Kind created by [`define_operation`].
    User { id: u64, name: Arc<str> },
}

impl OpKind {
    /// Bind rules and metadata into a node operation.
    pub fn bind(&self, rules: RuleSet, elaboration: Elaboration) -> Result<CustomOp> {
        let missing = |rule| IrError::MissingRule {
            op: self.to_string(),
            rule,
        };
        let rules = BoundRules {
            execute: rules.execute.ok_or_else(|| missing("execute"))?,
            infer_shapes: rules.infer_shapes.ok_or_else(|| missing("infer_shapes"))?,
            batch: rules.batch.ok_or_else(|| missing("batch"))?,
            differentiate: rules.differentiate.ok_or_else(|| missing("differentiate"))?,
        };
        Ok(CustomOp {
            kind: self.clone(),
            rules: Arc::new(rules),
            elaboration,
        })
    }

    /// True for kinds whose execution draws randomness.
    pub fn samples(&self) -> bool {
        matches!(self, OpKind::Assume | OpKind::Trace)
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpKind::Assume => write!(f, "assume"),
            OpKind::LogDensity => write!(f, "logpdf"),
            OpKind::Observe => write!(f, "observe"),
            OpKind::Trace => write!(f, "trace"),
            OpKind::User { name, .. } => write!(f, "{}", name),
        }
    }
}

/// Create a fresh user operation kind.
///
/// Every call yields a distinct kind, even for equal names.
pub fn define_operation(name: &str) -> OpKind {
    OpKind::User {
        id: NEXT_USER_KIND.fetch_add(1, Ordering::Relaxed),
        name: Arc::from(name),
    }
}

/// `execute(values) -> values`.
pub type ExecuteRule = Arc<dyn Fn(&Elaboration, &[Value]) -> Result<Vec<Value>> + Send + Sync>;
/// `infer_shapes(avals) -> avals`.
pub type InferRule = Arc<dyn Fn(&Elaboration, &[Aval]) -> Result<Vec<Aval>> + Send + Sync>;
/// `batch(values, axes) -> (values, axes)`.
pub type BatchRule = Arc<
    dyn Fn(&Elaboration, &[Value], &[Option<usize>]) -> Result<(Vec<Value>, Vec<Option<usize>>)>
        + Send
        + Sync,
>;
/// `differentiate(primals, tangents) -> (primals, tangents)`.
pub type DifferentiateRule =
    Arc<dyn Fn(&Elaboration, &[Value], &[Value]) -> Result<(Vec<Value>, Vec<Value>)> + Send + Sync>;

/// Builder for the rules of a custom operation.
#[derive(Clone, Default)]
pub struct RuleSet {
    execute: Option<ExecuteRule>,
    infer_shapes: Option<InferRule>,
    batch: Option<BatchRule>,
    differentiate: Option<DifferentiateRule>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn execute(
        mut self,
        f: impl Fn(&Elaboration, &[Value]) -> Result<Vec<Value>> + Send + Sync + 'static,
    ) -> Self {
        self.execute = Some(Arc::new(f));
        self
    }

    pub fn infer_shapes(
        mut self,
        f: impl Fn(&Elaboration, &[Aval]) -> Result<Vec<Aval>> + Send + Sync + 'static,
    ) -> Self {
        self.infer_shapes = Some(Arc::new(f));
        self
    }

    pub fn batch(
        mut self,
        f: impl Fn(&Elaboration, &[Value], &[Option<usize>]) -> Result<(Vec<Value>, Vec<Option<usize>>)>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.batch = Some(Arc::new(f));
        self
    }

    pub fn differentiate(
        mut self,
        f: impl Fn(&Elaboration, &[Value], &[Value]) -> Result<(Vec<Value>, Vec<Value>)>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.differentiate = Some(Arc::new(f));
        self
    }
}

struct BoundRules {
    execute: ExecuteRule,
    infer_shapes: InferRule,
    batch: BatchRule,
    differentiate: DifferentiateRule,
}

/// Opaque call-site data, downcast by the interpreter that understands it.
pub trait Payload: Any + Send + Sync {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any + Send + Sync> Payload for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Call-site metadata of a bound node.
#[derive(Clone, Default)]
pub struct Elaboration {
    /// Address of the choice this node records, if any.
    pub address: Option<Address>,
    /// Human-readable identity of the sampler or callee.
    pub label: String,
    /// Sampler or callee, downcast by interpreters.
    pub payload: Option<Arc<dyn Payload>>,
    /// Leading inputs that are captured constants rather than arguments.
    pub num_consts: usize,
    /// Draw once for all lanes instead of once per lane.
    pub shared: bool,
}

impl Elaboration {
    pub fn labelled(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Self::default()
        }
    }

    pub fn at(mut self, address: impl Into<Address>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn with_payload(mut self, payload: Arc<dyn Payload>) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Payload downcast to `T`.
    pub fn payload<T: Any>(&self) -> Option<&T> {
        self.payload.as_deref().and_then(|p| p.as_any().downcast_ref::<T>())
    }
}

impl fmt::Debug for Elaboration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Elaboration")
            .field("address", &self.address)
            .field("label", &self.label)
            .field("num_consts", &self.num_consts)
            .field("shared", &self.shared)
            .finish_non_exhaustive()
    }
}

/// A bound custom node.
#[derive(Clone)]
pub struct CustomOp {
    kind: OpKind,
    rules: Arc<BoundRules>,
    elaboration: Elaboration,
}

impl CustomOp {
    pub fn kind(&self) -> &OpKind {
        &self.kind
    }

    pub fn elaboration(&self) -> &Elaboration {
        &self.elaboration
    }

    /// Same rules, different metadata.
    pub fn with_elaboration(&self, elaboration: Elaboration) -> CustomOp {
        CustomOp {
            kind: self.kind.clone(),
            rules: Arc::clone(&self.rules),
            elaboration,
        }
    }

    pub fn execute(&self, values: &[Value]) -> Result<Vec<Value>> {
        (self.rules.execute)(&self.elaboration, values)
    }

    pub fn infer_shapes(&self, avals: &[Aval]) -> Result<Vec<Aval>> {
        (self.rules.infer_shapes)(&self.elaboration, avals)
    }

    pub fn batch(
        &self,
        values: &[Value],
        axes: &[Option<usize>],
    ) -> Result<(Vec<Value>, Vec<Option<usize>>)> {
        (self.rules.batch)(&self.elaboration, values, axes)
    }

    pub fn differentiate(
        &self,
        primals: &[Value],
        tangents: &[Value],
    ) -> Result<(Vec<Value>, Vec<Value>)> {
        (self.rules.differentiate)(&self.elaboration, primals, tangents)
    }
}

impl PartialEq for CustomOp {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

impl fmt::Debug for CustomOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomOp")
            .field("kind", &self.kind)
            .field("elaboration", &self.elaboration)
            .finish()
    }
}

impl fmt::Display for CustomOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        let e = &self.elaboration;
        match (&e.address, e.label.is_empty()) {
            (Some(addr), false) => write!(f, "[{} @ {}]", e.label, addr),
            (Some(addr), true) => write!(f, "[@ {}]", addr),
            (None, false) => write!(f, "[{}]", e.label),
            (None, true) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stoch_foundation::DType;

    fn complete_rules() -> RuleSet {
        RuleSet::new()
            .execute(|_, xs| Ok(xs.to_vec()))
            .infer_shapes(|_, avals| Ok(avals.to_vec()))
            .batch(|_, xs, axes| Ok((xs.to_vec(), axes.to_vec())))
            .differentiate(|_, p, t| Ok((p.to_vec(), t.to_vec())))
    }

    #[test]
    fn test_define_operation_is_fresh() {
        let a = define_operation("clip");
        let b = define_operation("clip");
        assert_ne!(a, b);
        assert_eq!(a.to_string(), "clip");
    }

    #[test]
    fn test_bind_reports_missing_rule() {
        let rules = RuleSet::new()
            .execute(|_, xs| Ok(xs.to_vec()))
            .infer_shapes(|_, avals| Ok(avals.to_vec()));
        let err = OpKind::Assume.bind(rules, Elaboration::default()).unwrap_err();
        assert_eq!(
            err,
            IrError::MissingRule {
                op: "assume".to_string(),
                rule: "batch"
            }
        );
    }

    #[test]
    fn test_equality_ignores_metadata() {
        let a = OpKind::Assume
            .bind(complete_rules(), Elaboration::labelled("flip").at("x"))
            .unwrap();
        let b = OpKind::Assume
            .bind(complete_rules(), Elaboration::labelled("normal").at("y"))
            .unwrap();
        let c = OpKind::Observe
            .bind(complete_rules(), Elaboration::labelled("flip").at("x"))
            .unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.to_string(), "assume[flip @ x]");
    }

    #[test]
    fn test_payload_downcast() {
        let e = Elaboration::labelled("n").with_payload(Arc::new(42usize));
        assert_eq!(e.payload::<usize>(), Some(&42));
        assert!(e.payload::<String>().is_none());
    }

    #[test]
    fn test_rules_run() {
        let op = define_operation("id").bind(complete_rules(), Elaboration::default()).unwrap();
        let out = op.execute(&[Value::f64(1.5)]).unwrap();
        assert_eq!(out, vec![Value::f64(1.5)]);
        let avals = op.infer_shapes(&[Aval::scalar(DType::F64)]).unwrap();
        assert_eq!(avals.len(), 1);
    }
}
