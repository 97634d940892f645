//! Expression specialization.

use std::sync::Arc;

use subset_lua_jit_runtime::dispatch::{compare, concat, float_arith, int_arith};
use subset_lua_jit_runtime::{
    dynamic_binop, dynamic_unop, BinOp, RuntimeResult, Table, TableKey, UnOp, Value,
};

use super::helpers::{
    expr_variant_name, float_cmp, float_int_cmp, index_value, int_cmp, int_float_cmp,
    load_field, narrow,
};
use super::{Emitted, FunctionSpecializer, MultiFn, Typed, ValueFn};
use crate::compile::inference::{
    binary_output_type, call_output_types, call_result_type, unary_output_type,
};
use crate::compile::lattice::Type;
use crate::error::{err, CResult, CompileError};
use crate::ir::core::{
    Capture, Expr, FunctionPrototype, Literal, LogicalOp, TableEntry, TableLiteral,
};
use crate::vm::Closure;

/// How a table constructor fills one entry.
enum TableInit {
    Slot(usize, ValueFn),
    Named(Arc<str>, ValueFn),
    Keyed(ValueFn, ValueFn),
    Positional(ValueFn),
}

impl<'a> FunctionSpecializer<'a> {
    pub(super) fn compile_expr(&mut self, expr: &Expr) -> CResult<Typed> {
        log::trace!("emit {} in {}", expr_variant_name(expr), self.proto.name());
        match expr {
            Expr::Literal(lit) => Ok(self.compile_literal(lit)),
            Expr::Local(slot) => {
                self.check_local(*slot)?;
                let slot = *slot;
                let ty = self.ctx.var_type(slot);
                let code = narrow(&ty, Box::new(move |fr| Ok(fr.read_local(slot))));
                Ok(Typed::new(code, ty))
            }
            Expr::Upvalue(index) => {
                self.check_upvalue(*index)?;
                let index = *index;
                let ty = self.ctx.upvalue_type(index);
                let code = narrow(&ty, Box::new(move |fr| Ok(fr.upvalue(index)?.get())));
                Ok(Typed::new(code, ty))
            }
            Expr::Global(name) => {
                let name = Arc::clone(name);
                let code: ValueFn = Box::new(move |fr| Ok(fr.engine.get_global(&name)));
                Ok(Typed::new(Emitted::Value(code), Type::Unknown))
            }
            Expr::Binary { op, lhs, rhs } => self.compile_binary(*op, lhs, rhs),
            Expr::Logical { op, lhs, rhs } => self.compile_logical(*op, lhs, rhs),
            Expr::Unary { op, operand } => self.compile_unary(*op, operand),
            Expr::Index { target, key } => self.compile_index(target, key),
            Expr::Call { callee, args } => self.compile_call(callee, args),
            Expr::Function { proto, captures } => self.compile_function(proto, captures),
            Expr::Table(literal) => self.compile_table(literal),
        }
    }

    pub(super) fn check_local(&self, slot: usize) -> CResult<()> {
        let count = self.proto.local_count();
        if slot < count {
            Ok(())
        } else {
            Err(CompileError::BadLocal {
                function: self.proto.name().to_string(),
                slot,
                count,
            })
        }
    }

    pub(super) fn check_upvalue(&self, index: usize) -> CResult<()> {
        let count = self.proto.upvalues().len();
        if index < count {
            Ok(())
        } else {
            Err(CompileError::BadUpvalue {
                function: self.proto.name().to_string(),
                index,
                count,
            })
        }
    }

    fn compile_literal(&mut self, lit: &Literal) -> Typed {
        let code = match lit {
            Literal::Nil => Emitted::Value(Box::new(|_| Ok(Value::Nil))),
            Literal::Bool(b) => {
                let b = *b;
                Emitted::Bool(Box::new(move |_| Ok(b)))
            }
            Literal::Int(n) => {
                let n = *n;
                Emitted::Int(Box::new(move |_| Ok(n)))
            }
            Literal::Float(x) => {
                let x = *x;
                Emitted::Float(Box::new(move |_| Ok(x)))
            }
            Literal::Str(s) => {
                let idx = self.add_constant(Value::Str(Arc::clone(s)));
                Emitted::Value(Box::new(move |fr| Ok(fr.constant(idx))))
            }
        };
        Typed::new(code, lit.static_type())
    }

    fn compile_binary(&mut self, op: BinOp, lhs: &Expr, rhs: &Expr) -> CResult<Typed> {
        let l = self.compile_expr(lhs)?;
        let r = self.compile_expr(rhs)?;
        let out = binary_output_type(op, &l.ty, &r.ty);
        let both_int = l.ty == Type::Integer && r.ty == Type::Integer;
        let both_numeric = l.ty.is_numeric() && r.ty.is_numeric();
        let int_kernel = matches!(
            op,
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Mod | BinOp::IntDiv
        );

        let code = if op.is_arithmetic() && int_kernel && both_int {
            let (a, b) = (l.code.into_int(), r.code.into_int());
            Emitted::Int(Box::new(move |fr| {
                let x = a(fr)?;
                let y = b(fr)?;
                int_arith(op, x, y)
            }))
        } else if op.is_arithmetic() && both_numeric {
            let (a, b) = (l.code.into_float(), r.code.into_float());
            Emitted::Float(Box::new(move |fr| {
                let x = a(fr)?;
                let y = b(fr)?;
                Ok(float_arith(op, x, y))
            }))
        } else if op.is_comparison() && both_int {
            let (a, b) = (l.code.into_int(), r.code.into_int());
            Emitted::Bool(Box::new(move |fr| {
                let x = a(fr)?;
                let y = b(fr)?;
                Ok(int_cmp(op, x, y))
            }))
        } else if op.is_comparison() && both_numeric {
            match (&l.ty, &r.ty) {
                (Type::Integer, _) => {
                    let (a, b) = (l.code.into_int(), r.code.into_float());
                    Emitted::Bool(Box::new(move |fr| {
                        let x = a(fr)?;
                        let y = b(fr)?;
                        Ok(int_float_cmp(op, x, y))
                    }))
                }
                (_, Type::Integer) => {
                    let (a, b) = (l.code.into_float(), r.code.into_int());
                    Emitted::Bool(Box::new(move |fr| {
                        let x = a(fr)?;
                        let y = b(fr)?;
                        Ok(float_int_cmp(op, x, y))
                    }))
                }
                _ => {
                    let (a, b) = (l.code.into_float(), r.code.into_float());
                    Emitted::Bool(Box::new(move |fr| {
                        let x = a(fr)?;
                        let y = b(fr)?;
                        Ok(float_cmp(op, x, y))
                    }))
                }
            }
        } else {
            let (a, b) = (l.code.into_value(), r.code.into_value());
            match op {
                BinOp::Eq | BinOp::Ne => Emitted::Bool(Box::new(move |fr| {
                    let x = a(fr)?;
                    let y = b(fr)?;
                    Ok(x.raw_equals(&y) == (op == BinOp::Eq))
                })),
                BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                    Emitted::Bool(Box::new(move |fr| {
                        let x = a(fr)?;
                        let y = b(fr)?;
                        compare(op, &x, &y)
                    }))
                }
                BinOp::Concat => Emitted::Value(Box::new(move |fr| {
                    let x = a(fr)?;
                    let y = b(fr)?;
                    concat(&x, &y).map(Value::Str)
                })),
                _ => narrow(
                    &out,
                    Box::new(move |fr| {
                        let x = a(fr)?;
                        let y = b(fr)?;
                        dynamic_binop(op, &x, &y)
                    }),
                ),
            }
        };
        Ok(Typed::new(code, out))
    }

    fn compile_logical(&mut self, op: LogicalOp, lhs: &Expr, rhs: &Expr) -> CResult<Typed> {
        let l = self.compile_expr(lhs)?;
        let r = self.compile_expr(rhs)?;
        let ty = l.ty.join(&r.ty);
        let code = match (l.code, r.code) {
            (Emitted::Bool(a), Emitted::Bool(b)) => Emitted::Bool(match op {
                LogicalOp::And => Box::new(move |fr| Ok(a(fr)? && b(fr)?)),
                LogicalOp::Or => Box::new(move |fr| Ok(a(fr)? || b(fr)?)),
            }),
            (a, b) => {
                let (a, b) = (a.into_value(), b.into_value());
                let code: ValueFn = match op {
                    LogicalOp::And => Box::new(move |fr| {
                        let v = a(fr)?;
                        if v.is_truthy() {
                            b(fr)
                        } else {
                            Ok(v)
                        }
                    }),
                    LogicalOp::Or => Box::new(move |fr| {
                        let v = a(fr)?;
                        if v.is_truthy() {
                            Ok(v)
                        } else {
                            b(fr)
                        }
                    }),
                };
                narrow(&ty, code)
            }
        };
        Ok(Typed::new(code, ty))
    }

    fn compile_unary(&mut self, op: UnOp, operand: &Expr) -> CResult<Typed> {
        let operand = self.compile_expr(operand)?;
        let out = unary_output_type(op, &operand.ty);
        let code = match (op, operand.code) {
            (UnOp::Neg, Emitted::Int(f)) => Emitted::Int(Box::new(move |fr| Ok(f(fr)?.wrapping_neg()))),
            (UnOp::Neg, Emitted::Float(f)) => Emitted::Float(Box::new(move |fr| Ok(-f(fr)?))),
            (UnOp::Not, code) => {
                let truthy = code.into_truthy();
                Emitted::Bool(Box::new(move |fr| Ok(!truthy(fr)?)))
            }
            (op, code) => {
                let f = code.into_value();
                narrow(&out, Box::new(move |fr| dynamic_unop(op, &f(fr)?)))
            }
        };
        Ok(Typed::new(code, out))
    }

    /// Slot of a constant string key in the compiled layout of a table
    /// type, together with the layout's shape id.
    fn constant_slot(&self, target: &Type, key: &Expr) -> Option<(u64, usize, Arc<str>)> {
        let shape = target.shape()?;
        let Expr::Literal(Literal::Str(name)) = key else {
            return None;
        };
        let layout = shape.compile();
        self.engine.shapes().register(shape);
        layout
            .slot_of(name)
            .map(|slot| (layout.shape_id(), slot, Arc::clone(name)))
    }

    pub(super) fn compile_slot_target(
        &mut self,
        target: &Expr,
        key: &Expr,
    ) -> CResult<(ValueFn, Option<(u64, usize, Arc<str>)>)> {
        let target = self.compile_expr(target)?;
        let slot = self.constant_slot(&target.ty, key);
        Ok((target.code.into_value(), slot))
    }

    fn compile_index(&mut self, target: &Expr, key: &Expr) -> CResult<Typed> {
        let (target, slot) = self.compile_slot_target(target, key)?;
        let code: ValueFn = match slot {
            Some((shape_id, slot, name)) => Box::new(move |fr| {
                let t = target(fr)?;
                load_field(&t, shape_id, slot, &name)
            }),
            None => {
                let key = self.compile_expr(key)?.code.into_value();
                Box::new(move |fr| {
                    let t = target(fr)?;
                    let k = key(fr)?;
                    index_value(&t, &k)
                })
            }
        };
        // Keyed stores can put any value in any slot.
        Ok(Typed::new(Emitted::Value(code), Type::Unknown))
    }

    fn compile_call(&mut self, callee: &Expr, args: &[Expr]) -> CResult<Typed> {
        let (code, callee_ty) = self.compile_call_values(callee, args, true)?;
        let ty = call_result_type(&callee_ty, self.max_iterations());
        let first: ValueFn =
            Box::new(move |fr| Ok(code(fr)?.into_iter().next().unwrap_or_default()));
        Ok(Typed::new(narrow(&ty, first), ty))
    }

    /// Call whose every result is kept, for `return f(...)`.
    pub(super) fn compile_call_multi(
        &mut self,
        callee: &Expr,
        args: &[Expr],
    ) -> CResult<(MultiFn, Vec<Type>)> {
        let (code, callee_ty) = self.compile_call_values(callee, args, false)?;
        let types = call_output_types(&callee_ty, self.max_iterations())
            .unwrap_or_else(|| vec![Type::Unknown]);
        Ok((code, types))
    }

    /// Emit a call through a fresh call site. Returns the code and the
    /// static type of the callee.
    pub(super) fn compile_call_values(
        &mut self,
        callee: &Expr,
        args: &[Expr],
        truncate: bool,
    ) -> CResult<(MultiFn, Type)> {
        let callee = self.compile_expr(callee)?;
        let callee_ty = callee.ty;
        let callee_code = callee.code.into_value();

        let mut static_types = Vec::with_capacity(args.len());
        let mut arg_code = Vec::with_capacity(args.len());
        for arg in args {
            let arg = self.compile_expr(arg)?;
            static_types.push(arg.ty);
            arg_code.push(arg.code.into_value());
        }

        let site = self.new_call_site(static_types, truncate);
        let code: MultiFn = Box::new(move |fr| {
            let callee = callee_code(fr)?;
            let mut values = Vec::with_capacity(arg_code.len());
            for arg in arg_code.iter() {
                values.push(arg(fr)?);
            }
            let engine = fr.engine;
            site.invoke(engine, &callee, values)
        });
        Ok((code, callee_ty))
    }

    fn compile_function(
        &mut self,
        proto: &Arc<FunctionPrototype>,
        captures: &[Capture],
    ) -> CResult<Typed> {
        if captures.len() != proto.upvalues().len() {
            return err(format!(
                "function literal {} captures {} values but declares {} upvalues",
                proto.name(),
                captures.len(),
                proto.upvalues().len()
            ));
        }
        for capture in captures {
            match capture {
                Capture::Local(slot) => self.check_local(*slot)?,
                Capture::Upvalue(index) => self.check_upvalue(*index)?,
            }
        }

        let inner = Arc::clone(proto);
        let captures = captures.to_vec();
        let code: ValueFn = Box::new(move |fr| {
            let cells = captures
                .iter()
                .map(|capture| fr.capture(*capture))
                .collect::<RuntimeResult<Vec<_>>>()?;
            let closure = Closure::new(Arc::clone(&inner), cells.into(), Arc::downgrade(fr.engine));
            Ok(Value::function(closure))
        });
        Ok(Typed::new(Emitted::Value(code), Type::Function(Arc::clone(proto))))
    }

    fn compile_table(&mut self, literal: &TableLiteral) -> CResult<Typed> {
        let shape = literal.shape();
        let layout = shape.compile();
        self.engine.shapes().register(shape);

        let mut inits = Vec::with_capacity(literal.entries().len());
        for entry in literal.entries() {
            let init = match entry {
                TableEntry::Named(name, value)
                | TableEntry::Keyed(Expr::Literal(Literal::Str(name)), value) => {
                    let value = self.compile_expr(value)?.code.into_value();
                    match layout.slot_of(name) {
                        Some(slot) => TableInit::Slot(slot, value),
                        // Discovered after the layout was frozen.
                        None => TableInit::Named(Arc::clone(name), value),
                    }
                }
                TableEntry::Keyed(key, value) => {
                    let key = self.compile_expr(key)?.code.into_value();
                    let value = self.compile_expr(value)?.code.into_value();
                    TableInit::Keyed(key, value)
                }
                TableEntry::Positional(value) => {
                    TableInit::Positional(self.compile_expr(value)?.code.into_value())
                }
            };
            inits.push(init);
        }

        let runtime_layout = Arc::clone(layout.runtime());
        let code: ValueFn = Box::new(move |fr| {
            let mut table = Table::new(Arc::clone(&runtime_layout));
            let mut next_index = 1i64;
            for init in inits.iter() {
                match init {
                    TableInit::Slot(slot, value) => {
                        let v = value(fr)?;
                        table.store_slot(*slot, v)?;
                    }
                    TableInit::Named(name, value) => {
                        let v = value(fr)?;
                        table.set(TableKey::Str(Arc::clone(name)), v);
                    }
                    TableInit::Keyed(key, value) => {
                        let k = key(fr)?;
                        let v = value(fr)?;
                        table.set(TableKey::from_value(&k)?, v);
                    }
                    TableInit::Positional(value) => {
                        let v = value(fr)?;
                        table.set(TableKey::Int(next_index), v);
                        next_index += 1;
                    }
                }
            }
            Ok(Value::Table(table.into_ref()))
        });
        Ok(Typed::new(Emitted::Value(code), Type::table(shape)))
    }
}
