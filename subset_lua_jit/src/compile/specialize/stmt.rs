//! Statement specialization.

use std::sync::Arc;

use subset_lua_jit_runtime::{RuntimeError, RuntimeResult, Value};

use super::helpers::{store_field, store_index, stmt_variant_name};
use super::{Block, Emitted, Flow, FunctionSpecializer, StmtFn, Typed, ValueFn};
use crate::compile::inference::for_var_type;
use crate::compile::lattice::Type;
use crate::error::{CResult, CompileError};
use crate::ir::core::{Expr, SlotId, Stmt};
use crate::vm::frame::Frame;

impl<'a> FunctionSpecializer<'a> {
    pub(super) fn compile_block(&mut self, stmts: &[Stmt]) -> CResult<Block> {
        stmts
            .iter()
            .map(|stmt| self.compile_stmt(stmt))
            .collect::<CResult<Vec<_>>>()
            .map(Vec::into_boxed_slice)
    }

    fn compile_loop_body(&mut self, body: &[Stmt]) -> CResult<Block> {
        self.loop_depth += 1;
        let block = self.compile_block(body);
        self.loop_depth -= 1;
        block
    }

    pub(super) fn compile_stmt(&mut self, stmt: &Stmt) -> CResult<StmtFn> {
        log::trace!("emit {} in {}", stmt_variant_name(stmt), self.proto.name());
        match stmt {
            Stmt::Local { slot, value } => {
                self.check_local(*slot)?;
                let slot = *slot;
                match value {
                    Some(value) => {
                        let value = self.compile_expr(value)?.code.into_value();
                        Ok(Box::new(move |fr| {
                            let v = value(fr)?;
                            fr.declare_local(slot, v);
                            Ok(Flow::Normal)
                        }))
                    }
                    None => Ok(Box::new(move |fr| {
                        fr.declare_local(slot, Value::Nil);
                        Ok(Flow::Normal)
                    })),
                }
            }
            Stmt::Assign { slot, value } => {
                self.check_local(*slot)?;
                let slot = *slot;
                let value = self.compile_expr(value)?.code.into_value();
                Ok(Box::new(move |fr| {
                    let v = value(fr)?;
                    fr.write_local(slot, v);
                    Ok(Flow::Normal)
                }))
            }
            Stmt::SetUpvalue { index, value } => {
                self.check_upvalue(*index)?;
                let index = *index;
                let value = self.compile_expr(value)?.code.into_value();
                Ok(Box::new(move |fr| {
                    let v = value(fr)?;
                    fr.upvalue(index)?.set(v);
                    Ok(Flow::Normal)
                }))
            }
            Stmt::SetGlobal { name, value } => {
                let name = Arc::clone(name);
                let value = self.compile_expr(value)?.code.into_value();
                Ok(Box::new(move |fr| {
                    let v = value(fr)?;
                    fr.engine.set_global(Arc::clone(&name), v);
                    Ok(Flow::Normal)
                }))
            }
            Stmt::SetIndex { target, key, value } => self.compile_set_index(target, key, value),
            Stmt::Expr(Expr::Call { callee, args }) => {
                let (call, _) = self.compile_call_values(callee, args, true)?;
                Ok(Box::new(move |fr| {
                    call(fr)?;
                    Ok(Flow::Normal)
                }))
            }
            Stmt::Expr(expr) => {
                let code = self.compile_expr(expr)?.code.into_value();
                Ok(Box::new(move |fr| {
                    code(fr)?;
                    Ok(Flow::Normal)
                }))
            }
            Stmt::If {
                cond,
                then_block,
                else_block,
            } => {
                let cond = self.compile_expr(cond)?.code.into_truthy();
                let then_block = self.compile_block(then_block)?;
                let else_block = self.compile_block(else_block)?;
                Ok(Box::new(move |fr| {
                    if cond(fr)? {
                        run_block(&then_block, fr)
                    } else {
                        run_block(&else_block, fr)
                    }
                }))
            }
            Stmt::While { cond, body } => {
                let cond = self.compile_expr(cond)?.code.into_truthy();
                let body = self.compile_loop_body(body)?;
                Ok(Box::new(move |fr| {
                    while cond(fr)? {
                        match run_block(&body, fr)? {
                            Flow::Normal => {}
                            Flow::Break => break,
                            ret @ Flow::Return(_) => return Ok(ret),
                        }
                    }
                    Ok(Flow::Normal)
                }))
            }
            Stmt::NumericFor {
                var,
                start,
                limit,
                step,
                body,
            } => self.compile_numeric_for(*var, start, limit, step.as_ref(), body),
            Stmt::Return(values) => self.compile_return(values),
            Stmt::Break => {
                if self.loop_depth == 0 {
                    return Err(CompileError::BreakOutsideLoop {
                        function: self.proto.name().to_string(),
                    });
                }
                Ok(Box::new(|_| Ok(Flow::Break)))
            }
        }
    }

    fn compile_set_index(&mut self, target: &Expr, key: &Expr, value: &Expr) -> CResult<StmtFn> {
        let (target, slot) = self.compile_slot_target(target, key)?;
        match slot {
            Some((shape_id, slot, name)) => {
                let value = self.compile_expr(value)?.code.into_value();
                Ok(Box::new(move |fr| {
                    let t = target(fr)?;
                    let v = value(fr)?;
                    store_field(&t, shape_id, slot, &name, v)?;
                    Ok(Flow::Normal)
                }))
            }
            None => {
                let key = self.compile_expr(key)?.code.into_value();
                let value = self.compile_expr(value)?.code.into_value();
                Ok(Box::new(move |fr| {
                    let t = target(fr)?;
                    let k = key(fr)?;
                    let v = value(fr)?;
                    store_index(&t, &k, v)?;
                    Ok(Flow::Normal)
                }))
            }
        }
    }

    fn compile_return(&mut self, values: &[Expr]) -> CResult<StmtFn> {
        if let [Expr::Call { callee, args }] = values {
            let (call, _) = self.compile_call_multi(callee, args)?;
            return Ok(Box::new(move |fr| Ok(Flow::Return(call(fr)?))));
        }
        let values = values
            .iter()
            .map(|value| -> CResult<ValueFn> { Ok(self.compile_expr(value)?.code.into_value()) })
            .collect::<CResult<Vec<_>>>()?;
        Ok(Box::new(move |fr| {
            let mut out = Vec::with_capacity(values.len());
            for value in values.iter() {
                out.push(value(fr)?);
            }
            Ok(Flow::Return(out))
        }))
    }

    fn compile_numeric_for(
        &mut self,
        var: SlotId,
        start: &Expr,
        limit: &Expr,
        step: Option<&Expr>,
        body: &[Stmt],
    ) -> CResult<StmtFn> {
        self.check_local(var)?;
        let start = self.compile_expr(start)?;
        let limit = self.compile_expr(limit)?;
        let step = match step {
            Some(step) => self.compile_expr(step)?,
            None => Typed::new(Emitted::Int(Box::new(|_| Ok(1))), Type::Integer),
        };
        let body = self.compile_loop_body(body)?;

        match for_var_type(&start.ty, &limit.ty, &step.ty) {
            Type::Integer => {
                let start = start.code.into_int();
                let limit = limit.code.into_value();
                let step = step.code.into_int();
                Ok(Box::new(move |fr| {
                    let start = start(fr)?;
                    let limit = limit(fr)?;
                    let step = step(fr)?;
                    run_int_loop(fr, var, start, &limit, step, &body)
                }))
            }
            Type::Float => {
                let start = start.code.into_float();
                let limit = limit.code.into_float();
                let step = step.code.into_float();
                Ok(Box::new(move |fr| {
                    let start = start(fr)?;
                    let limit = limit(fr)?;
                    let step = step(fr)?;
                    run_float_loop(fr, var, start, limit, step, &body)
                }))
            }
            _ => {
                let start = start.code.into_value();
                let limit = limit.code.into_value();
                let step = step.code.into_value();
                Ok(Box::new(move |fr| {
                    let start = start(fr)?;
                    let limit = limit(fr)?;
                    let step = step(fr)?;
                    run_dynamic_loop(fr, var, start, limit, step, &body)
                }))
            }
        }
    }
}

/// Run statements in order until one leaves the block.
pub(crate) fn run_block(block: &[StmtFn], frame: &mut Frame<'_>) -> RuntimeResult<Flow> {
    for stmt in block {
        match stmt(frame)? {
            Flow::Normal => {}
            other => return Ok(other),
        }
    }
    Ok(Flow::Normal)
}

fn for_error(what: &str) -> RuntimeError {
    RuntimeError::type_error(format!("'for' {} must be a number", what))
}

fn zero_step() -> RuntimeError {
    RuntimeError::custom("'for' step is zero")
}

/// Integer bound for an integer loop. `None` when the loop cannot run
/// (NaN limit, or a float limit beyond the start in the step's direction
/// that clamps out of range).
fn int_limit(limit: &Value, step: i64) -> RuntimeResult<Option<i64>> {
    match limit {
        Value::Int(n) => Ok(Some(*n)),
        Value::Float(f) if f.is_nan() => Ok(None),
        Value::Float(f) => {
            let bound = if step > 0 { f.floor() } else { f.ceil() };
            if bound >= i64::MAX as f64 {
                Ok(Some(i64::MAX))
            } else if bound <= i64::MIN as f64 {
                Ok(Some(i64::MIN))
            } else {
                Ok(Some(bound as i64))
            }
        }
        _ => Err(for_error("limit")),
    }
}

fn run_int_loop(
    fr: &mut Frame<'_>,
    var: SlotId,
    start: i64,
    limit: &Value,
    step: i64,
    body: &[StmtFn],
) -> RuntimeResult<Flow> {
    if step == 0 {
        return Err(zero_step());
    }
    let Some(limit) = int_limit(limit, step)? else {
        return Ok(Flow::Normal);
    };
    let mut i = start;
    while (step > 0 && i <= limit) || (step < 0 && i >= limit) {
        // A fresh variable per iteration, so closures capture each value.
        fr.declare_local(var, Value::Int(i));
        match run_block(body, fr)? {
            Flow::Normal => {}
            Flow::Break => break,
            ret @ Flow::Return(_) => return Ok(ret),
        }
        match i.checked_add(step) {
            Some(next) => i = next,
            None => break,
        }
    }
    Ok(Flow::Normal)
}

fn run_float_loop(
    fr: &mut Frame<'_>,
    var: SlotId,
    start: f64,
    limit: f64,
    step: f64,
    body: &[StmtFn],
) -> RuntimeResult<Flow> {
    if step == 0.0 {
        return Err(zero_step());
    }
    let mut i = start;
    while (step > 0.0 && i <= limit) || (step < 0.0 && i >= limit) {
        fr.declare_local(var, Value::Float(i));
        match run_block(body, fr)? {
            Flow::Normal => {}
            Flow::Break => break,
            ret @ Flow::Return(_) => return Ok(ret),
        }
        i += step;
    }
    Ok(Flow::Normal)
}

fn run_dynamic_loop(
    fr: &mut Frame<'_>,
    var: SlotId,
    start: Value,
    limit: Value,
    step: Value,
    body: &[StmtFn],
) -> RuntimeResult<Flow> {
    if !start.is_number() {
        return Err(for_error("initial value"));
    }
    if !limit.is_number() {
        return Err(for_error("limit"));
    }
    if !step.is_number() {
        return Err(for_error("step"));
    }
    match (&start, &step) {
        (Value::Int(start), Value::Int(step)) => run_int_loop(fr, var, *start, &limit, *step, body),
        _ => {
            let (Some(start), Some(limit), Some(step)) =
                (start.as_float(), limit.as_float(), step.as_float())
            else {
                return Err(for_error("initial value"));
            };
            run_float_loop(fr, var, start, limit, step, body)
        }
    }
}
