//! Core IR nodes and function prototypes.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use subset_lua_jit_runtime::{BinOp, UnOp};

use crate::compile::cache::{SignatureKey, SpecializationCache};
use crate::compile::inference::InferenceContext;
use crate::compile::lattice::Type;
use crate::compile::shape::ShapeDescriptor;
use crate::compile::specialize::Specialization;
use crate::error::CResult;
use crate::vm::Engine;

/// Index of a local variable in its function's frame. Parameters occupy
/// the first slots.
pub type SlotId = usize;

static NEXT_PROTOTYPE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
}

impl Literal {
    pub fn static_type(&self) -> Type {
        match self {
            Literal::Nil => Type::Nil,
            Literal::Bool(_) => Type::Boolean,
            Literal::Int(_) => Type::Integer,
            Literal::Float(_) => Type::Float,
            Literal::Str(_) => Type::String,
        }
    }
}

/// Short-circuit operators; they yield one of their operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

/// Where a function literal takes each of its upvalues from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capture {
    /// A local of the enclosing function (boxed on capture)
    Local(SlotId),
    /// An upvalue of the enclosing function (shared cell)
    Upvalue(usize),
}

#[derive(Debug, Clone)]
pub enum Expr {
    Literal(Literal),
    Local(SlotId),
    Upvalue(usize),
    Global(Arc<str>),
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Logical {
        op: LogicalOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Unary {
        op: UnOp,
        operand: Box<Expr>,
    },
    Index {
        target: Box<Expr>,
        key: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Function {
        proto: Arc<FunctionPrototype>,
        captures: Vec<Capture>,
    },
    Table(TableLiteral),
}

impl Expr {
    pub fn nil() -> Self {
        Expr::Literal(Literal::Nil)
    }

    pub fn bool(b: bool) -> Self {
        Expr::Literal(Literal::Bool(b))
    }

    pub fn int(n: i64) -> Self {
        Expr::Literal(Literal::Int(n))
    }

    pub fn float(f: f64) -> Self {
        Expr::Literal(Literal::Float(f))
    }

    pub fn str(s: &str) -> Self {
        Expr::Literal(Literal::Str(Arc::from(s)))
    }

    pub fn local(slot: SlotId) -> Self {
        Expr::Local(slot)
    }

    pub fn upvalue(index: usize) -> Self {
        Expr::Upvalue(index)
    }

    pub fn global(name: &str) -> Self {
        Expr::Global(Arc::from(name))
    }

    pub fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn logical(op: LogicalOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Logical {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn unary(op: UnOp, operand: Expr) -> Self {
        Expr::Unary {
            op,
            operand: Box::new(operand),
        }
    }

    pub fn index(target: Expr, key: Expr) -> Self {
        Expr::Index {
            target: Box::new(target),
            key: Box::new(key),
        }
    }

    /// `target.name`
    pub fn field(target: Expr, name: &str) -> Self {
        Expr::index(target, Expr::str(name))
    }

    pub fn call(callee: Expr, args: Vec<Expr>) -> Self {
        Expr::Call {
            callee: Box::new(callee),
            args,
        }
    }

    pub fn function(proto: Arc<FunctionPrototype>, captures: Vec<Capture>) -> Self {
        Expr::Function { proto, captures }
    }

    pub fn table(entries: Vec<TableEntry>) -> Self {
        Expr::Table(TableLiteral::new(entries))
    }

    pub fn is_call(&self) -> bool {
        matches!(self, Expr::Call { .. })
    }
}

#[derive(Debug, Clone)]
pub enum TableEntry {
    /// `name = value`
    Named(Arc<str>, Expr),
    /// `[key] = value`
    Keyed(Expr, Expr),
    /// Positional entry, keyed by its 1-based position
    Positional(Expr),
}

impl TableEntry {
    pub fn named(name: &str, value: Expr) -> Self {
        TableEntry::Named(Arc::from(name), value)
    }
}

/// A table constructor. Owns the shape describing its statically known
/// keys; clones share that shape.
#[derive(Debug, Clone)]
pub struct TableLiteral {
    shape: Arc<ShapeDescriptor>,
    entries: Vec<TableEntry>,
}

impl TableLiteral {
    pub fn new(entries: Vec<TableEntry>) -> Self {
        Self {
            shape: ShapeDescriptor::new(),
            entries,
        }
    }

    pub fn shape(&self) -> &Arc<ShapeDescriptor> {
        &self.shape
    }

    pub fn entries(&self) -> &[TableEntry] {
        &self.entries
    }
}

#[derive(Debug, Clone)]
pub enum Stmt {
    /// `local x = value` (or `local x`)
    Local {
        slot: SlotId,
        value: Option<Expr>,
    },
    Assign {
        slot: SlotId,
        value: Expr,
    },
    SetUpvalue {
        index: usize,
        value: Expr,
    },
    SetGlobal {
        name: Arc<str>,
        value: Expr,
    },
    SetIndex {
        target: Expr,
        key: Expr,
        value: Expr,
    },
    Expr(Expr),
    If {
        cond: Expr,
        then_block: Vec<Stmt>,
        else_block: Vec<Stmt>,
    },
    While {
        cond: Expr,
        body: Vec<Stmt>,
    },
    NumericFor {
        var: SlotId,
        start: Expr,
        limit: Expr,
        step: Option<Expr>,
        body: Vec<Stmt>,
    },
    Return(Vec<Expr>),
    Break,
}

impl Stmt {
    pub fn set_global(name: &str, value: Expr) -> Self {
        Stmt::SetGlobal {
            name: Arc::from(name),
            value,
        }
    }

    pub fn ret(value: Expr) -> Self {
        Stmt::Return(vec![value])
    }
}

#[derive(Debug, Clone)]
pub struct LocalDecl {
    pub name: Arc<str>,
    /// Captured by a nested function literal; stored in a shared cell.
    pub captured: bool,
}

/// Static description of one upvalue of a prototype.
#[derive(Debug, Clone)]
pub struct UpvalueTemplate {
    pub name: Arc<str>,
    /// Type guaranteed by the front end for every closure of the prototype.
    pub known_type: Option<Type>,
    /// The cell is never written after the closure is created, so the type
    /// of its current value is stable for the lifetime of one closure.
    pub sealed: bool,
}

impl UpvalueTemplate {
    pub fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            known_type: None,
            sealed: false,
        }
    }

    pub fn with_type(mut self, ty: Type) -> Self {
        self.known_type = Some(ty);
        self
    }

    pub fn sealed(mut self) -> Self {
        self.sealed = true;
        self
    }

    /// Type every closure of the prototype is guaranteed to have here.
    pub fn static_type(&self) -> Type {
        self.known_type.clone().unwrap_or(Type::Unknown)
    }
}

/// A function definition: body, locals, upvalue templates, the memoized
/// static return types and the cache of its specializations.
pub struct FunctionPrototype {
    id: u64,
    name: Arc<str>,
    param_count: usize,
    locals: Vec<LocalDecl>,
    upvalues: Vec<UpvalueTemplate>,
    body: Vec<Stmt>,
    return_types: OnceCell<Vec<Type>>,
    computing_returns: AtomicBool,
    cache: SpecializationCache,
}

impl FunctionPrototype {
    pub fn builder(name: &str) -> PrototypeBuilder {
        PrototypeBuilder::new(name)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn param_count(&self) -> usize {
        self.param_count
    }

    pub fn locals(&self) -> &[LocalDecl] {
        &self.locals
    }

    pub fn local_count(&self) -> usize {
        self.locals.len()
    }

    pub fn upvalues(&self) -> &[UpvalueTemplate] {
        &self.upvalues
    }

    pub fn body(&self) -> &[Stmt] {
        &self.body
    }

    pub fn cache(&self) -> &SpecializationCache {
        &self.cache
    }

    /// Types every closure of this prototype is guaranteed to see in its
    /// upvalues, independent of which closure is called.
    pub fn static_upvalue_types(&self) -> Vec<Type> {
        self.upvalues.iter().map(UpvalueTemplate::static_type).collect()
    }

    /// Specialization for the given signature, compiling it on first use.
    pub fn specialize(
        self: &Arc<Self>,
        engine: &Arc<Engine>,
        arg_types: Vec<Type>,
        upvalue_types: Vec<Type>,
        truncate_return: bool,
    ) -> CResult<Arc<Specialization>> {
        let key = SignatureKey::for_prototype(self, arg_types, upvalue_types, truncate_return);
        self.cache.get(engine, self, key)
    }

    /// Return types under the weakest assumptions: every argument unknown
    /// and every upvalue at its static type. Valid for any specialization
    /// of this prototype.
    ///
    /// Computed once. A request that arrives while the computation is in
    /// progress (recursion, or another thread) gets `[Unknown]`.
    pub fn return_types(&self, max_iterations: usize) -> Vec<Type> {
        if let Some(types) = self.return_types.get() {
            return types.clone();
        }
        if self.computing_returns.swap(true, Ordering::AcqRel) {
            return vec![Type::Unknown];
        }
        let mut ctx = InferenceContext::new(
            self,
            vec![Type::Unknown; self.param_count],
            self.static_upvalue_types(),
            max_iterations,
        );
        ctx.analyze(&self.body);
        let types = ctx.return_types().to_vec();
        let _ = self.return_types.set(types.clone());
        self.computing_returns.store(false, Ordering::Release);
        types
    }
}

impl fmt::Debug for FunctionPrototype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionPrototype")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("param_count", &self.param_count)
            .field("locals", &self.locals.len())
            .field("upvalues", &self.upvalues)
            .field("specializations", &self.cache.len())
            .finish()
    }
}

/// Builder for [`FunctionPrototype`]. Parameters get the first slots,
/// locals follow in declaration order.
#[derive(Debug)]
pub struct PrototypeBuilder {
    name: Arc<str>,
    params: Vec<Arc<str>>,
    locals: Vec<Arc<str>>,
    upvalues: Vec<UpvalueTemplate>,
    body: Vec<Stmt>,
}

impl PrototypeBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            params: Vec::new(),
            locals: Vec::new(),
            upvalues: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn param(mut self, name: &str) -> Self {
        self.params.push(Arc::from(name));
        self
    }

    pub fn local(mut self, name: &str) -> Self {
        self.locals.push(Arc::from(name));
        self
    }

    pub fn upvalue(mut self, template: UpvalueTemplate) -> Self {
        self.upvalues.push(template);
        self
    }

    pub fn body(mut self, body: Vec<Stmt>) -> Self {
        self.body = body;
        self
    }

    pub fn build(self) -> Arc<FunctionPrototype> {
        let param_count = self.params.len();
        let mut locals: Vec<LocalDecl> = self
            .params
            .into_iter()
            .chain(self.locals)
            .map(|name| LocalDecl {
                name,
                captured: false,
            })
            .collect();
        mark_captured_block(&self.body, &mut locals);

        Arc::new(FunctionPrototype {
            id: NEXT_PROTOTYPE_ID.fetch_add(1, Ordering::Relaxed),
            name: self.name,
            param_count,
            locals,
            upvalues: self.upvalues,
            body: self.body,
            return_types: OnceCell::new(),
            computing_returns: AtomicBool::new(false),
            cache: SpecializationCache::new(),
        })
    }
}

fn mark_captured_block(stmts: &[Stmt], locals: &mut [LocalDecl]) {
    for stmt in stmts {
        match stmt {
            Stmt::Local { value, .. } => {
                if let Some(value) = value {
                    mark_captured_expr(value, locals);
                }
            }
            Stmt::Assign { value, .. }
            | Stmt::SetUpvalue { value, .. }
            | Stmt::SetGlobal { value, .. }
            | Stmt::Expr(value) => mark_captured_expr(value, locals),
            Stmt::SetIndex { target, key, value } => {
                mark_captured_expr(target, locals);
                mark_captured_expr(key, locals);
                mark_captured_expr(value, locals);
            }
            Stmt::If {
                cond,
                then_block,
                else_block,
            } => {
                mark_captured_expr(cond, locals);
                mark_captured_block(then_block, locals);
                mark_captured_block(else_block, locals);
            }
            Stmt::While { cond, body } => {
                mark_captured_expr(cond, locals);
                mark_captured_block(body, locals);
            }
            Stmt::NumericFor {
                start,
                limit,
                step,
                body,
                ..
            } => {
                mark_captured_expr(start, locals);
                mark_captured_expr(limit, locals);
                if let Some(step) = step {
                    mark_captured_expr(step, locals);
                }
                mark_captured_block(body, locals);
            }
            Stmt::Return(values) => {
                for value in values {
                    mark_captured_expr(value, locals);
                }
            }
            Stmt::Break => {}
        }
    }
}

fn mark_captured_expr(expr: &Expr, locals: &mut [LocalDecl]) {
    match expr {
        Expr::Literal(_) | Expr::Local(_) | Expr::Upvalue(_) | Expr::Global(_) => {}
        Expr::Binary { lhs, rhs, .. } | Expr::Logical { lhs, rhs, .. } => {
            mark_captured_expr(lhs, locals);
            mark_captured_expr(rhs, locals);
        }
        Expr::Unary { operand, .. } => mark_captured_expr(operand, locals),
        Expr::Index { target, key } => {
            mark_captured_expr(target, locals);
            mark_captured_expr(key, locals);
        }
        Expr::Call { callee, args } => {
            mark_captured_expr(callee, locals);
            for arg in args {
                mark_captured_expr(arg, locals);
            }
        }
        Expr::Function { captures, .. } => {
            for capture in captures {
                if let Capture::Local(slot) = capture {
                    if let Some(decl) = locals.get_mut(*slot) {
                        decl.captured = true;
                    }
                }
            }
        }
        Expr::Table(literal) => {
            for entry in literal.entries() {
                match entry {
                    TableEntry::Named(_, value) | TableEntry::Positional(value) => {
                        mark_captured_expr(value, locals)
                    }
                    TableEntry::Keyed(key, value) => {
                        mark_captured_expr(key, locals);
                        mark_captured_expr(value, locals);
                    }
                }
            }
        }
    }
}
