//! Interpreter environments.
//!
//! An [`Environment`] maps the variables of one graph to the values an
//! interpreter computed for them during a single pass. Each variable is
//! written at most once; writes to [`Var::DROP`] are discarded; reading a
//! literal returns the literal without touching the map.

use std::collections::HashMap;

use stoch_foundation::{Slot, Value};

use crate::error::{IrError, Result};
use crate::graph::{Atom, Graph, Var};

/// How an interpreter turns a literal into its value type.
pub trait FromLiteral: Clone {
    fn from_literal(value: &Value) -> Self;
}

impl FromLiteral for Value {
    fn from_literal(value: &Value) -> Self {
        value.clone()
    }
}

impl FromLiteral for Slot {
    fn from_literal(value: &Value) -> Self {
        Slot::Uniform(value.clone())
    }
}

/// Variable bindings for one interpreter pass.
#[derive(Debug, Clone)]
pub struct Environment<V> {
    bindings: HashMap<Var, V>,
}

impl<V> Default for Environment<V> {
    fn default() -> Self {
        Self {
            bindings: HashMap::new(),
        }
    }
}

impl<V: FromLiteral> Environment<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Environment with a graph's constvars and invars bound.
    pub fn for_graph(graph: &Graph, args: Vec<V>) -> Result<Self> {
        if args.len() != graph.invars.len() {
            return Err(IrError::Arity {
                op: "graph".to_string(),
                expected: graph.invars.len(),
                found: args.len(),
            });
        }
        let mut env = Self::new();
        for (var, value) in graph.constvars.iter().zip(&graph.consts) {
            env.write(*var, V::from_literal(value))?;
        }
        for (var, value) in graph.invars.iter().zip(args) {
            env.write(*var, value)?;
        }
        Ok(env)
    }

    pub fn read(&self, atom: &Atom) -> Result<V> {
        match atom {
            Atom::Lit(v) => Ok(V::from_literal(v)),
            Atom::Var(var) => self
                .bindings
                .get(var)
                .cloned()
                .ok_or(IrError::UnboundVariable(*var)),
        }
    }

    pub fn read_all<'a>(&self, atoms: impl IntoIterator<Item = &'a Atom>) -> Result<Vec<V>> {
        atoms.into_iter().map(|a| self.read(a)).collect()
    }

    pub fn write(&mut self, var: Var, value: V) -> Result<()> {
        if var.is_drop() {
            return Ok(());
        }
        if self.bindings.insert(var, value).is_some() {
            return Err(IrError::VariableRebound(var));
        }
        Ok(())
    }

    pub fn write_all(&mut self, vars: &[Var], values: Vec<V>) -> Result<()> {
        if vars.len() != values.len() {
            return Err(IrError::Arity {
                op: "write".to_string(),
                expected: vars.len(),
                found: values.len(),
            });
        }
        for (var, value) in vars.iter().zip(values) {
            self.write(*var, value)?;
        }
        Ok(())
    }

    pub fn contains(&self, var: Var) -> bool {
        self.bindings.contains_key(&var)
    }

    /// Apply `f` to every binding, keeping the variables.
    pub fn map_values<W>(&self, mut f: impl FnMut(&V) -> Result<W>) -> Result<Environment<W>> {
        let mut bindings = HashMap::with_capacity(self.bindings.len());
        for (var, value) in &self.bindings {
            bindings.insert(*var, f(value)?);
        }
        Ok(Environment { bindings })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_once() {
        let mut env: Environment<Value> = Environment::new();
        env.write(Var(0), Value::f64(1.0)).unwrap();
        let err = env.write(Var(0), Value::f64(2.0)).unwrap_err();
        assert_eq!(err, IrError::VariableRebound(Var(0)));
    }

    #[test]
    fn test_drop_writes_ignored() {
        let mut env: Environment<Value> = Environment::new();
        env.write(Var::DROP, Value::f64(1.0)).unwrap();
        env.write(Var::DROP, Value::f64(2.0)).unwrap();
        assert!(!env.contains(Var::DROP));
    }

    #[test]
    fn test_unbound_read() {
        let env: Environment<Value> = Environment::new();
        assert_eq!(env.read(&Atom::Var(Var(3))), Err(IrError::UnboundVariable(Var(3))));
    }

    #[test]
    fn test_literal_read() {
        let env: Environment<Slot> = Environment::new();
        let slot = env.read(&Atom::Lit(Value::i64(4))).unwrap();
        assert_eq!(slot, Slot::Uniform(Value::i64(4)));
    }
}
