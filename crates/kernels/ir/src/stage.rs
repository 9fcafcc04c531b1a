//! Graph staging.
//!
//! A [`Stager`] records the operations a host closure performs on symbolic
//! [`Atom`]s and turns them into a closed [`Graph`]. Output avals are
//! inferred per node as the closure runs.
//!
//! Branch and loop bodies are staged into their own sub-graphs. A body may
//! refer to atoms of the enclosing closure; such captures are turned into
//! explicit inputs of the sub-graph (extra operands for a branch, extra
//! constants for a loop), so every sub-graph is closed.

use std::collections::HashMap;
use std::sync::Arc;

use smallvec::SmallVec;
use stoch_foundation::{BinaryOp, DType, UnaryOp, Value};

use crate::custom::CustomOp;
use crate::error::{IrError, Result};
use crate::graph::{Atom, Aval, Equation, Graph, Op, Var};
use crate::primitive::Primitive;

/// One branch body for [`Stager::switch`].
pub type Branch<'a, E> = Box<dyn FnOnce(&mut Stager, &[Atom]) -> std::result::Result<Vec<Atom>, E> + 'a>;

/// Records operations into a graph.
#[derive(Debug, Default)]
pub struct Stager {
    next_var: u32,
    invars: Vec<Var>,
    in_avals: Vec<Aval>,
    constvars: Vec<Var>,
    consts: Vec<Value>,
    equations: Vec<Equation>,
    avals: HashMap<Var, Aval>,
    /// Variables of enclosing stagers visible to this body.
    outer: HashMap<Var, Aval>,
    captured: Vec<Var>,
}

/// Stage `f` against inputs of the given avals.
pub fn stage<E, F>(in_avals: &[Aval], f: F) -> std::result::Result<Graph, E>
where
    E: From<IrError>,
    F: FnOnce(&mut Stager, &[Atom]) -> std::result::Result<Vec<Atom>, E>,
{
    let mut stager = Stager::default();
    let inputs: Vec<Atom> = in_avals.iter().map(|a| stager.input(a.clone())).collect();
    let outputs = f(&mut stager, &inputs)?;
    let (graph, _captured) = stager.finish(outputs)?;
    Ok(graph)
}

impl Stager {
    fn fresh(&mut self, aval: Aval) -> Var {
        let var = Var(self.next_var);
        self.next_var += 1;
        self.avals.insert(var, aval);
        var
    }

    /// Declare a graph input.
    pub fn input(&mut self, aval: Aval) -> Atom {
        let var = self.fresh(aval.clone());
        self.invars.push(var);
        self.in_avals.push(aval);
        Atom::Var(var)
    }

    /// Embed a constant. Scalars become literals, arrays become constvars.
    pub fn constant(&mut self, value: Value) -> Atom {
        if value.is_scalar() {
            return Atom::Lit(value);
        }
        let var = self.fresh(Aval::of(&value));
        self.constvars.push(var);
        self.consts.push(value);
        Atom::Var(var)
    }

    /// Aval of an atom visible to this stager.
    pub fn aval(&mut self, atom: &Atom) -> Result<Aval> {
        Ok(self.use_atom(atom.clone())?.1)
    }

    fn use_atom(&mut self, atom: Atom) -> Result<(Atom, Aval)> {
        match atom {
            Atom::Lit(v) => {
                let aval = Aval::of(&v);
                Ok((Atom::Lit(v), aval))
            }
            Atom::Var(var) => {
                if let Some(aval) = self.avals.get(&var) {
                    return Ok((atom, aval.clone()));
                }
                let aval = self
                    .outer
                    .get(&var)
                    .cloned()
                    .ok_or(IrError::UnboundVariable(var))?;
                self.captured.push(var);
                self.avals.insert(var, aval.clone());
                Ok((atom, aval))
            }
        }
    }

    fn use_atoms(&mut self, atoms: Vec<Atom>) -> Result<(Vec<Atom>, Vec<Aval>)> {
        let mut out = Vec::with_capacity(atoms.len());
        let mut avals = Vec::with_capacity(atoms.len());
        for atom in atoms {
            let (a, aval) = self.use_atom(atom)?;
            out.push(a);
            avals.push(aval);
        }
        Ok((out, avals))
    }

    fn push(&mut self, op: Op, inputs: Vec<Atom>, out_avals: Vec<Aval>) -> Vec<Atom> {
        let outputs: SmallVec<[Var; 2]> = out_avals.iter().map(|a| self.fresh(a.clone())).collect();
        let atoms = outputs.iter().map(|v| Atom::Var(*v)).collect();
        tracing::trace!(op = %op.name(), outputs = outputs.len(), "staged node");
        self.equations.push(Equation {
            op,
            inputs: inputs.into(),
            outputs,
            out_avals: out_avals.into(),
        });
        atoms
    }

    /// Record a primitive.
    pub fn prim(&mut self, prim: Primitive, inputs: Vec<Atom>) -> Result<Atom> {
        let (inputs, avals) = self.use_atoms(inputs)?;
        let out = prim.infer(&avals)?;
        let mut outs = self.push(Op::Prim(prim), inputs, vec![out]);
        outs.pop().ok_or_else(|| IrError::InvalidGraph("primitive without output".to_string()))
    }

    /// Record a bound custom operation.
    pub fn bind(&mut self, op: CustomOp, inputs: &[Atom]) -> Result<Vec<Atom>> {
        let (inputs, avals) = self.use_atoms(inputs.to_vec())?;
        let out_avals = op.infer_shapes(&avals)?;
        Ok(self.push(Op::Custom(op), inputs, out_avals))
    }

    /// Re-record a node of another graph against new inputs.
    ///
    /// The operation and output avals are reused; the outputs are fresh.
    pub fn replay(&mut self, eqn: &Equation, inputs: Vec<Atom>) -> Result<Vec<Atom>> {
        let (inputs, _) = self.use_atoms(inputs)?;
        Ok(self.push(eqn.op.clone(), inputs, eqn.out_avals.to_vec()))
    }

    fn child(&self) -> Stager {
        let mut outer = self.outer.clone();
        outer.extend(self.avals.iter().map(|(v, a)| (*v, a.clone())));
        Stager {
            next_var: self.next_var,
            outer,
            ..Stager::default()
        }
    }

    fn finish(mut self, outputs: Vec<Atom>) -> Result<(Graph, Vec<(Var, Aval)>)> {
        let (outvars, out_avals) = self.use_atoms(outputs)?;
        let captured = self
            .captured
            .iter()
            .map(|v| (*v, self.avals[v].clone()))
            .collect();
        let graph = Graph {
            invars: self.invars,
            in_avals: self.in_avals,
            constvars: self.constvars,
            consts: self.consts,
            equations: self.equations,
            outvars,
            out_avals,
        };
        Ok((graph, captured))
    }

    fn stage_body<E, F>(
        &mut self,
        in_avals: &[Aval],
        f: F,
    ) -> std::result::Result<(Graph, Vec<(Var, Aval)>), E>
    where
        E: From<IrError>,
        F: FnOnce(&mut Stager, &[Atom]) -> std::result::Result<Vec<Atom>, E>,
    {
        let mut sub = self.child();
        let inputs: Vec<Atom> = in_avals.iter().map(|a| sub.input(a.clone())).collect();
        let outputs = f(&mut sub, &inputs)?;
        let next_var = sub.next_var;
        let staged = sub.finish(outputs)?;
        self.next_var = next_var;
        Ok(staged)
    }

    /// Indexed branch over `branches`.
    pub fn switch<E>(
        &mut self,
        index: impl Into<Atom>,
        operands: &[Atom],
        branches: Vec<Branch<'_, E>>,
    ) -> std::result::Result<Vec<Atom>, E>
    where
        E: From<IrError>,
    {
        if branches.is_empty() {
            return Err(IrError::Arity {
                op: "cond".to_string(),
                expected: 1,
                found: 0,
            }
            .into());
        }
        let (index, index_aval) = self.use_atom(index.into())?;
        if index_aval.shape.rank() != 0 {
            return Err(IrError::ShapeInference {
                op: "cond".to_string(),
                message: format!("index must be scalar, found {}", index_aval.shape),
            }
            .into());
        }
        let (operands, operand_avals) = self.use_atoms(operands.to_vec())?;

        let mut staged = Vec::with_capacity(branches.len());
        for branch in branches {
            staged.push(self.stage_body(&operand_avals, branch)?);
        }

        let out_avals = staged[0].0.out_avals.clone();
        let mut union: Vec<(Var, Aval)> = Vec::new();
        for (graph, captured) in &staged {
            if graph.out_avals != out_avals {
                return Err(IrError::ShapeInference {
                    op: "cond".to_string(),
                    message: "branches return different avals".to_string(),
                }
                .into());
            }
            for (var, aval) in captured {
                if !union.iter().any(|(v, _)| v == var) {
                    union.push((*var, aval.clone()));
                }
            }
        }

        let mut graphs = Vec::with_capacity(staged.len());
        for (mut graph, _) in staged {
            for (var, aval) in &union {
                graph.invars.push(*var);
                graph.in_avals.push(aval.clone());
            }
            graphs.push(Arc::new(graph));
        }

        let mut inputs = Vec::with_capacity(1 + operands.len() + union.len());
        inputs.push(index);
        inputs.extend(operands);
        for (var, _) in &union {
            inputs.push(self.use_atom(Atom::Var(*var))?.0);
        }
        Ok(self.push(Op::Cond { branches: graphs }, inputs, out_avals))
    }

    /// Two-way branch on a boolean predicate.
    pub fn if_else<E, T, F>(
        &mut self,
        pred: impl Into<Atom>,
        operands: &[Atom],
        on_true: T,
        on_false: F,
    ) -> std::result::Result<Vec<Atom>, E>
    where
        E: From<IrError>,
        T: FnOnce(&mut Stager, &[Atom]) -> std::result::Result<Vec<Atom>, E>,
        F: FnOnce(&mut Stager, &[Atom]) -> std::result::Result<Vec<Atom>, E>,
    {
        let index = self.convert(pred, DType::I64)?;
        let branches: Vec<Branch<'_, E>> = vec![Box::new(on_false), Box::new(on_true)];
        self.switch(index, operands, branches)
    }

    /// Fixed-length loop. `body(carry, x_i) -> (carry, y_i)`.
    ///
    /// Returns the final carry and the stacked `ys`.
    pub fn scan<E, F>(
        &mut self,
        length: usize,
        init: &[Atom],
        xs: &[Atom],
        body: F,
    ) -> std::result::Result<(Vec<Atom>, Vec<Atom>), E>
    where
        E: From<IrError>,
        F: FnOnce(&mut Stager, &[Atom], &[Atom]) -> std::result::Result<(Vec<Atom>, Vec<Atom>), E>,
    {
        self.scan_impl(length, false, init, xs, body)
    }

    /// [`Stager::scan`] visiting `xs` from last to first.
    pub fn scan_reverse<E, F>(
        &mut self,
        length: usize,
        init: &[Atom],
        xs: &[Atom],
        body: F,
    ) -> std::result::Result<(Vec<Atom>, Vec<Atom>), E>
    where
        E: From<IrError>,
        F: FnOnce(&mut Stager, &[Atom], &[Atom]) -> std::result::Result<(Vec<Atom>, Vec<Atom>), E>,
    {
        self.scan_impl(length, true, init, xs, body)
    }

    fn scan_impl<E, F>(
        &mut self,
        length: usize,
        reverse: bool,
        init: &[Atom],
        xs: &[Atom],
        body: F,
    ) -> std::result::Result<(Vec<Atom>, Vec<Atom>), E>
    where
        E: From<IrError>,
        F: FnOnce(&mut Stager, &[Atom], &[Atom]) -> std::result::Result<(Vec<Atom>, Vec<Atom>), E>,
    {
        let (init, carry_avals) = self.use_atoms(init.to_vec())?;
        let (xs, xs_avals) = self.use_atoms(xs.to_vec())?;
        let mut slice_avals = Vec::with_capacity(xs_avals.len());
        for aval in &xs_avals {
            if aval.shape.leading() != Some(length) {
                return Err(IrError::ShapeInference {
                    op: "scan".to_string(),
                    message: format!("xs of shape {} do not have length {}", aval.shape, length),
                }
                .into());
            }
            slice_avals.push(Aval::new(aval.dtype, aval.shape.tail()));
        }

        let num_carry = carry_avals.len();
        let mut in_avals = carry_avals.clone();
        in_avals.extend(slice_avals);
        let (mut graph, captured) = self.stage_body(&in_avals, |s: &mut Stager, ins: &[Atom]| {
            let (carry, ys) = body(s, &ins[..num_carry], &ins[num_carry..])?;
            let mut outs = carry;
            outs.extend(ys);
            Ok::<_, E>(outs)
        })?;

        for (expected, found) in carry_avals.iter().zip(&graph.out_avals) {
            if expected != found {
                return Err(IrError::CarryMismatch {
                    expected: expected.clone(),
                    found: found.clone(),
                }
                .into());
            }
        }
        if graph.out_avals.len() < num_carry {
            return Err(IrError::Arity {
                op: "scan".to_string(),
                expected: num_carry,
                found: graph.out_avals.len(),
            }
            .into());
        }

        let num_consts = captured.len();
        let mut invars: Vec<Var> = captured.iter().map(|(v, _)| *v).collect();
        let mut const_avals: Vec<Aval> = captured.iter().map(|(_, a)| a.clone()).collect();
        invars.append(&mut graph.invars);
        const_avals.append(&mut graph.in_avals);
        graph.invars = invars;
        graph.in_avals = const_avals;

        let mut out_avals = carry_avals;
        out_avals.extend(
            graph.out_avals[num_carry..]
                .iter()
                .map(|a| Aval::new(a.dtype, a.shape.prepend(length))),
        );

        let mut inputs = Vec::with_capacity(num_consts + init.len() + xs.len());
        for (var, _) in &captured {
            inputs.push(self.use_atom(Atom::Var(*var))?.0);
        }
        inputs.extend(init);
        inputs.extend(xs);
        let op = Op::Scan {
            body: Arc::new(graph),
            length,
            num_consts,
            num_carry,
            reverse,
        };
        let outs = self.push(op, inputs, out_avals);
        let ys = outs[num_carry..].to_vec();
        let carry = outs[..num_carry].to_vec();
        Ok((carry, ys))
    }

    pub fn select(
        &mut self,
        pred: impl Into<Atom>,
        on_true: impl Into<Atom>,
        on_false: impl Into<Atom>,
    ) -> Result<Atom> {
        self.prim(
            Primitive::Select,
            vec![pred.into(), on_true.into(), on_false.into()],
        )
    }

    pub fn convert(&mut self, x: impl Into<Atom>, dtype: DType) -> Result<Atom> {
        self.prim(Primitive::Convert(dtype), vec![x.into()])
    }

    /// Sum of every element.
    pub fn sum(&mut self, x: impl Into<Atom>) -> Result<Atom> {
        self.prim(Primitive::ReduceSum, vec![x.into()])
    }

    pub fn index(&mut self, x: impl Into<Atom>, i: impl Into<Atom>) -> Result<Atom> {
        self.prim(Primitive::Index, vec![x.into(), i.into()])
    }

    pub fn iota(&mut self, length: usize) -> Result<Atom> {
        self.prim(Primitive::Iota { length }, Vec::new())
    }

    pub fn stack(&mut self, xs: &[Atom]) -> Result<Atom> {
        self.prim(Primitive::Stack, xs.to_vec())
    }
}

macro_rules! binary_helpers {
    ($($name:ident => $op:ident),* $(,)?) => {
        impl Stager {
            $(
                pub fn $name(&mut self, a: impl Into<Atom>, b: impl Into<Atom>) -> Result<Atom> {
                    self.prim(Primitive::Binary(BinaryOp::$op), vec![a.into(), b.into()])
                }
            )*
        }
    };
}

macro_rules! unary_helpers {
    ($($name:ident => $op:ident),* $(,)?) => {
        impl Stager {
            $(
                pub fn $name(&mut self, x: impl Into<Atom>) -> Result<Atom> {
                    self.prim(Primitive::Unary(UnaryOp::$op), vec![x.into()])
                }
            )*
        }
    };
}

binary_helpers! {
    add => Add, sub => Sub, mul => Mul, div => Div, pow => Pow,
    max => Max, min => Min,
    eq => Eq, ne => Ne, lt => Lt, le => Le, gt => Gt, ge => Ge,
    and => And, or => Or,
}

unary_helpers! {
    neg => Neg, not => Not, exp => Exp, log => Log, log1p => Log1p,
    sqrt => Sqrt, abs => Abs, sin => Sin, cos => Cos, tanh => Tanh,
    logistic => Logistic,
}
