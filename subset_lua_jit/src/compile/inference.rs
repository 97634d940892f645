//! Type inference context.
//!
//! One context is built per compilation attempt. It owns the variable-type
//! map for the function's locals and the running return-type tuple, and it
//! is consulted by the specializer for every local read.
//!
//! Before code generation the context walks the body until the variable
//! map stops changing (flow-insensitive, bounded by
//! `max_inference_iterations`), so every emitted read sees the final type
//! of its variable. If the bound is hit every local is widened to
//! `Unknown`.
//!
//! Variables follow a three-point lattice: unassigned, fixed to the type of
//! their first assignment, or conflicted (read as `Unknown`) once assigned
//! a different type. Two table literals assigned to one variable merge
//! their shapes instead of conflicting, as long as neither shape has been
//! compiled.

use subset_lua_jit_runtime::{BinOp, UnOp};

use super::lattice::Type;
use super::shape::ShapeDescriptor;
use crate::ir::core::{Expr, FunctionPrototype, Literal, LogicalOp, SlotId, Stmt, TableEntry};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VarType {
    Unassigned,
    Fixed(Type),
    Conflicted,
}

impl VarType {
    pub fn read(&self) -> Type {
        match self {
            // A declared local holds nil until assigned.
            VarType::Unassigned => Type::Nil,
            VarType::Fixed(ty) => ty.clone(),
            VarType::Conflicted => Type::Unknown,
        }
    }
}

#[derive(Debug)]
pub struct InferenceContext<'p> {
    proto: &'p FunctionPrototype,
    vars: Vec<VarType>,
    upvalue_types: Vec<Type>,
    returns: Option<Vec<Type>>,
    max_iterations: usize,
    converged: bool,
}

impl<'p> InferenceContext<'p> {
    /// Parameters start fixed to `arg_types` (missing ones are `Nil`).
    pub fn new(
        proto: &'p FunctionPrototype,
        arg_types: Vec<Type>,
        upvalue_types: Vec<Type>,
        max_iterations: usize,
    ) -> Self {
        let mut vars = vec![VarType::Unassigned; proto.local_count()];
        for (slot, var) in vars.iter_mut().enumerate().take(proto.param_count()) {
            *var = VarType::Fixed(arg_types.get(slot).cloned().unwrap_or(Type::Nil));
        }
        Self {
            proto,
            vars,
            upvalue_types,
            returns: None,
            max_iterations: max_iterations.max(1),
            converged: false,
        }
    }

    /// Walk `body` to a fixed point of the variable map.
    pub fn analyze(&mut self, body: &[Stmt]) {
        for iteration in 0..self.max_iterations {
            let before = self.vars.clone();
            self.returns = None;
            self.walk_body(body);
            if self.vars == before {
                log::trace!(
                    "inference for {} converged after {} iteration(s)",
                    self.proto.name(),
                    iteration + 1
                );
                self.converged = true;
                return;
            }
        }

        log::warn!(
            "inference for {} did not converge after {} iterations; widening locals to Unknown",
            self.proto.name(),
            self.max_iterations
        );
        self.vars.iter_mut().for_each(|v| *v = VarType::Conflicted);
        self.returns = None;
        self.walk_body(body);
    }

    pub fn converged(&self) -> bool {
        self.converged
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    /// Type of a local as seen by reads. Captured locals may be written by
    /// nested closures and are always `Unknown`.
    pub fn var_type(&self, slot: SlotId) -> Type {
        let captured = self
            .proto
            .locals()
            .get(slot)
            .map_or(false, |decl| decl.captured);
        if captured {
            return Type::Unknown;
        }
        self.vars.get(slot).map_or(Type::Unknown, VarType::read)
    }

    pub fn var_state(&self, slot: SlotId) -> Option<&VarType> {
        self.vars.get(slot)
    }

    pub fn upvalue_type(&self, index: usize) -> Type {
        self.upvalue_types.get(index).cloned().unwrap_or(Type::Unknown)
    }

    /// Return tuple joined over every return seen so far. Empty when the
    /// function never returns a value.
    pub fn return_types(&self) -> &[Type] {
        self.returns.as_deref().unwrap_or(&[])
    }

    pub fn record_assignment(&mut self, slot: SlotId, ty: Type) {
        let Some(var) = self.vars.get_mut(slot) else {
            return;
        };
        let next = match &*var {
            VarType::Unassigned => VarType::Fixed(ty),
            VarType::Conflicted => VarType::Conflicted,
            VarType::Fixed(current) if *current == ty => return,
            VarType::Fixed(current) => match (current.shape(), ty.shape()) {
                (Some(a), Some(b)) => match ShapeDescriptor::merge(a, b) {
                    Some(merged) => VarType::Fixed(Type::table(&merged)),
                    None => VarType::Conflicted,
                },
                _ => VarType::Conflicted,
            },
        };
        *var = next;
    }

    /// Join a return list into the running tuple element-wise. Missing
    /// trailing values are `nil`.
    pub fn record_return(&mut self, types: &[Type]) {
        let joined = match self.returns.take() {
            None => types.to_vec(),
            Some(existing) => {
                let len = existing.len().max(types.len());
                (0..len)
                    .map(|i| {
                        let a = existing.get(i).unwrap_or(&Type::Nil);
                        let b = types.get(i).unwrap_or(&Type::Nil);
                        a.join(b)
                    })
                    .collect()
            }
        };
        self.returns = Some(joined);
    }

    /// Static type of an expression under the current variable map. Table
    /// literals record their keys in their shape as a side effect.
    pub fn infer(&self, expr: &Expr) -> Type {
        match expr {
            Expr::Literal(lit) => lit.static_type(),
            Expr::Local(slot) => self.var_type(*slot),
            Expr::Upvalue(index) => self.upvalue_type(*index),
            Expr::Global(_) => Type::Unknown,
            Expr::Binary { op, lhs, rhs } => {
                let l = self.infer(lhs);
                let r = self.infer(rhs);
                binary_output_type(*op, &l, &r)
            }
            Expr::Logical { lhs, rhs, .. } => self.infer(lhs).join(&self.infer(rhs)),
            Expr::Unary { op, operand } => unary_output_type(*op, &self.infer(operand)),
            Expr::Index { target, key } => {
                self.infer(target);
                self.infer(key);
                // Generic keyed stores can put anything in any slot.
                Type::Unknown
            }
            Expr::Call { callee, args } => {
                let callee_ty = self.infer(callee);
                for arg in args {
                    self.infer(arg);
                }
                first_of(call_output_types(&callee_ty, self.max_iterations))
            }
            Expr::Function { proto, .. } => Type::Function(proto.clone()),
            Expr::Table(literal) => {
                let shape = literal.shape();
                for entry in literal.entries() {
                    match entry {
                        TableEntry::Named(name, value) => shape.amend(name, self.infer(value)),
                        TableEntry::Keyed(Expr::Literal(Literal::Str(name)), value) => {
                            shape.amend(name, self.infer(value))
                        }
                        TableEntry::Keyed(key, value) => {
                            self.infer(key);
                            self.infer(value);
                            shape.amend_unknown();
                        }
                        TableEntry::Positional(value) => {
                            self.infer(value);
                            shape.amend_unknown();
                        }
                    }
                }
                Type::table(shape)
            }
        }
    }

    /// Types produced by `return <call>`, which forwards every value.
    pub fn infer_forwarded(&self, call: &Expr) -> Vec<Type> {
        match call {
            Expr::Call { callee, args } => {
                let callee_ty = self.infer(callee);
                for arg in args {
                    self.infer(arg);
                }
                call_output_types(&callee_ty, self.max_iterations)
                    .unwrap_or_else(|| vec![Type::Unknown])
            }
            other => vec![self.infer(other)],
        }
    }

    fn walk_body(&mut self, body: &[Stmt]) {
        self.walk_block(body);
        if block_falls_through(body) {
            self.record_return(&[]);
        }
    }

    fn walk_block(&mut self, stmts: &[Stmt]) {
        for stmt in stmts {
            self.walk_stmt(stmt);
        }
    }

    fn walk_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Local { slot, value } => {
                let ty = value.as_ref().map_or(Type::Nil, |v| self.infer(v));
                self.record_assignment(*slot, ty);
            }
            Stmt::Assign { slot, value } => {
                let ty = self.infer(value);
                self.record_assignment(*slot, ty);
            }
            Stmt::SetUpvalue { value, .. } | Stmt::SetGlobal { value, .. } | Stmt::Expr(value) => {
                self.infer(value);
            }
            Stmt::SetIndex { target, key, value } => {
                self.infer(target);
                self.infer(key);
                self.infer(value);
            }
            Stmt::If {
                cond,
                then_block,
                else_block,
            } => {
                self.infer(cond);
                self.walk_block(then_block);
                self.walk_block(else_block);
            }
            Stmt::While { cond, body } => {
                self.infer(cond);
                self.walk_block(body);
            }
            Stmt::NumericFor {
                var,
                start,
                limit,
                step,
                body,
            } => {
                let start = self.infer(start);
                let limit = self.infer(limit);
                let step = step.as_ref().map_or(Type::Integer, |s| self.infer(s));
                self.record_assignment(*var, for_var_type(&start, &limit, &step));
                self.walk_block(body);
            }
            Stmt::Return(values) => {
                let types = match values.as_slice() {
                    [single] if single.is_call() => self.infer_forwarded(single),
                    _ => values.iter().map(|v| self.infer(v)).collect(),
                };
                self.record_return(&types);
            }
            Stmt::Break => {}
        }
    }
}

/// Whether control can reach the end of the block.
pub fn block_falls_through(stmts: &[Stmt]) -> bool {
    match stmts.last() {
        Some(Stmt::Return(_)) => false,
        Some(Stmt::If {
            then_block,
            else_block,
            ..
        }) => block_falls_through(then_block) || block_falls_through(else_block),
        _ => true,
    }
}

/// Result type of a binary operator.
pub fn binary_output_type(op: BinOp, lhs: &Type, rhs: &Type) -> Type {
    match op {
        BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Mod | BinOp::IntDiv => {
            match (lhs, rhs) {
                (Type::Integer, Type::Integer) => Type::Integer,
                (l, r) if l.is_numeric() && r.is_numeric() => Type::Float,
                _ => Type::Unknown,
            }
        }
        BinOp::Div | BinOp::Pow => Type::Float,
        BinOp::Concat => Type::String,
        BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => Type::Boolean,
    }
}

/// Result type of a unary operator.
pub fn unary_output_type(op: UnOp, operand: &Type) -> Type {
    match op {
        UnOp::Neg => match operand {
            Type::Integer => Type::Integer,
            Type::Float => Type::Float,
            _ => Type::Unknown,
        },
        UnOp::Not => Type::Boolean,
        UnOp::Len => Type::Integer,
    }
}

/// Type of a numeric `for` control variable.
pub fn for_var_type(start: &Type, limit: &Type, step: &Type) -> Type {
    match (start, step) {
        (Type::Integer, Type::Integer) if limit.is_numeric() => Type::Integer,
        _ if start.is_numeric() && limit.is_numeric() && step.is_numeric() => Type::Float,
        _ => Type::Unknown,
    }
}

/// Return tuple of a call through a value of type `callee`, when the
/// callee's prototype is statically known.
pub fn call_output_types(callee: &Type, max_iterations: usize) -> Option<Vec<Type>> {
    callee
        .prototype()
        .map(|proto| proto.return_types(max_iterations))
}

fn first_of(types: Option<Vec<Type>>) -> Type {
    match types {
        Some(types) => types.into_iter().next().unwrap_or(Type::Nil),
        None => Type::Unknown,
    }
}

/// First-value type of a call expression.
pub fn call_result_type(callee: &Type, max_iterations: usize) -> Type {
    first_of(call_output_types(callee, max_iterations))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::core::{Expr, Stmt};
    use pretty_assertions::assert_eq;

    fn analyze(proto: &FunctionPrototype, args: Vec<Type>) -> InferenceContext<'_> {
        let mut ctx = InferenceContext::new(proto, args, Vec::new(), 8);
        ctx.analyze(proto.body());
        ctx
    }

    #[test]
    fn test_first_assignment_fixes_type() {
        // local x = a + 1; return x
        let proto = FunctionPrototype::builder("f")
            .param("a")
            .local("x")
            .body(vec![
                Stmt::Local {
                    slot: 1,
                    value: Some(Expr::binary(BinOp::Add, Expr::local(0), Expr::int(1))),
                },
                Stmt::ret(Expr::local(1)),
            ])
            .build();

        let ctx = analyze(&proto, vec![Type::Integer]);
        assert_eq!(ctx.var_type(1), Type::Integer);
        assert_eq!(ctx.return_types(), &[Type::Integer]);

        let ctx = analyze(&proto, vec![Type::Float]);
        assert_eq!(ctx.var_type(1), Type::Float);
    }

    #[test]
    fn test_conflicting_assignment_reads_unknown() {
        // local x = 1; x = "s"
        let proto = FunctionPrototype::builder("f")
            .local("x")
            .body(vec![
                Stmt::Local {
                    slot: 0,
                    value: Some(Expr::int(1)),
                },
                Stmt::Assign {
                    slot: 0,
                    value: Expr::str("s"),
                },
            ])
            .build();
        let ctx = analyze(&proto, vec![]);
        assert_eq!(ctx.var_state(0), Some(&VarType::Conflicted));
        assert_eq!(ctx.var_type(0), Type::Unknown);
    }

    #[test]
    fn test_loop_carried_widening_reaches_fixed_point() {
        // local x = 0; while c do x = x + 0.5 end; return x
        let proto = FunctionPrototype::builder("f")
            .param("c")
            .local("x")
            .body(vec![
                Stmt::Local {
                    slot: 1,
                    value: Some(Expr::int(0)),
                },
                Stmt::While {
                    cond: Expr::local(0),
                    body: vec![Stmt::Assign {
                        slot: 1,
                        value: Expr::binary(BinOp::Add, Expr::local(1), Expr::float(0.5)),
                    }],
                },
                Stmt::ret(Expr::local(1)),
            ])
            .build();
        let ctx = analyze(&proto, vec![Type::Boolean]);
        assert!(ctx.converged());
        assert_eq!(ctx.var_type(1), Type::Unknown);
    }

    #[test]
    fn test_two_literals_merge_shapes() {
        // local t = {a = 1}; if c then t = {b = 2} end
        let proto = FunctionPrototype::builder("f")
            .param("c")
            .local("t")
            .body(vec![
                Stmt::Local {
                    slot: 1,
                    value: Some(Expr::table(vec![TableEntry::named("a", Expr::int(1))])),
                },
                Stmt::If {
                    cond: Expr::local(0),
                    then_block: vec![Stmt::Assign {
                        slot: 1,
                        value: Expr::table(vec![TableEntry::named("b", Expr::int(2))]),
                    }],
                    else_block: vec![],
                },
            ])
            .build();
        let ctx = analyze(&proto, vec![Type::Boolean]);
        let ty = ctx.var_type(1);
        let shape = ty.shape().expect("merged table shape");
        let keys: Vec<String> = shape.keys().iter().map(|k| k.to_string()).collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn test_record_return_joins_and_pads_with_nil() {
        let proto = FunctionPrototype::builder("f").build();
        let mut ctx = InferenceContext::new(&proto, vec![], vec![], 8);
        ctx.record_return(&[Type::Integer, Type::Nil]);
        ctx.record_return(&[Type::Integer]);
        assert_eq!(ctx.return_types(), &[Type::Integer, Type::Nil]);
        ctx.record_return(&[Type::String]);
        assert_eq!(ctx.return_types(), &[Type::Unknown, Type::Nil]);
    }

    #[test]
    fn test_if_returning_on_both_branches_does_not_fall_through() {
        let proto = FunctionPrototype::builder("f")
            .param("c")
            .body(vec![Stmt::If {
                cond: Expr::local(0),
                then_block: vec![Stmt::ret(Expr::int(1))],
                else_block: vec![Stmt::ret(Expr::int(2))],
            }])
            .build();
        let ctx = analyze(&proto, vec![Type::Unknown]);
        assert_eq!(ctx.return_types(), &[Type::Integer]);
    }

    #[test]
    fn test_operator_output_types() {
        assert_eq!(
            binary_output_type(BinOp::Add, &Type::Integer, &Type::Float),
            Type::Float
        );
        assert_eq!(
            binary_output_type(BinOp::Div, &Type::Integer, &Type::Integer),
            Type::Float
        );
        assert_eq!(
            binary_output_type(BinOp::Add, &Type::Unknown, &Type::Integer),
            Type::Unknown
        );
        assert_eq!(unary_output_type(UnOp::Len, &Type::Unknown), Type::Integer);
        assert_eq!(
            for_var_type(&Type::Integer, &Type::Float, &Type::Integer),
            Type::Integer
        );
    }

    #[test]
    fn test_call_to_known_prototype_uses_its_return_type() {
        let callee = FunctionPrototype::builder("g")
            .body(vec![Stmt::ret(Expr::str("x"))])
            .build();
        let ty = Type::Function(callee);
        assert_eq!(call_result_type(&ty, 8), Type::String);
        assert_eq!(call_result_type(&Type::Unknown, 8), Type::Unknown);
    }
}
