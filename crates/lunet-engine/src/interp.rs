//! Tree-walking evaluator.
//!
//! Scoping is a chain of `Rc`-shared scopes; closures capture the scope they
//! were created in. Unresolved names fall through to the globals table.
//! Index and assignment honor `__index`/`__newindex` metamethods on tables
//! and userdata.

use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::ast::{BinOp, Block, Expr, Stat, TableItem, Target, UnOp};
use crate::error::{EngineError, EngineResult};
use crate::state::Vm;
use crate::table::Table;
use crate::value::{Function, NativeFn, ScriptFn, Value};

/// Shared lexical scope.
pub type Env = Rc<RefCell<Scope>>;

/// One lexical scope frame.
pub struct Scope {
    vars: FxHashMap<Rc<str>, Value>,
    parent: Option<Env>,
}

impl Scope {
    /// Fresh chunk-level scope with no parent.
    pub fn new_root() -> Env {
        Rc::new(RefCell::new(Scope {
            vars: FxHashMap::default(),
            parent: None,
        }))
    }

    /// Child scope for a block or call frame.
    pub fn child(parent: &Env) -> Env {
        Rc::new(RefCell::new(Scope {
            vars: FxHashMap::default(),
            parent: Some(parent.clone()),
        }))
    }

    /// Look a name up through the chain.
    pub fn lookup(env: &Env, name: &str) -> Option<Value> {
        let mut current = env.clone();
        loop {
            if let Some(v) = current.borrow().vars.get(name) {
                return Some(v.clone());
            }
            let parent = current.borrow().parent.clone();
            match parent {
                Some(p) => current = p,
                None => return None,
            }
        }
    }

    /// Assign to an existing local; returns false if the name is not bound
    /// anywhere in the chain.
    pub fn assign_existing(env: &Env, name: &str, value: Value) -> bool {
        let mut current = env.clone();
        loop {
            if let Some(slot) = current.borrow_mut().vars.get_mut(name) {
                *slot = value;
                return true;
            }
            let parent = current.borrow().parent.clone();
            match parent {
                Some(p) => current = p,
                None => return false,
            }
        }
    }

    /// Introduce a local in this scope.
    pub fn define(env: &Env, name: impl Into<Rc<str>>, value: Value) {
        env.borrow_mut().vars.insert(name.into(), value);
    }
}

/// Statement-level control flow.
pub(crate) enum Flow {
    Normal,
    Break,
    Return(Vec<Value>),
}

/// Guard against unbounded `__index` chains.
const MAX_META_DEPTH: usize = 100;

impl Vm {
    // ========================================================================
    // Calls
    // ========================================================================

    /// Call a value with the given arguments, returning all results.
    pub fn call_value(&mut self, f: Value, args: Vec<Value>) -> EngineResult<Vec<Value>> {
        self.depth += 1;
        if self.depth > crate::state::MAX_CALL_DEPTH {
            self.depth -= 1;
            return Err(EngineError::runtime("stack overflow"));
        }
        let result = self.call_value_inner(f, args);
        self.depth -= 1;
        result
    }

    fn call_value_inner(&mut self, f: Value, args: Vec<Value>) -> EngineResult<Vec<Value>> {
        match f {
            Value::Function(callable) => match &*callable {
                Function::Script(sf) => {
                    let proto = sf.proto.clone();
                    let scope = Scope::child(&sf.env);
                    for (i, param) in proto.params.iter().enumerate() {
                        let v = args.get(i).cloned().unwrap_or(Value::Nil);
                        Scope::define(&scope, param.as_str(), v);
                    }
                    match self.exec_block(&proto.body, &scope)? {
                        Flow::Return(values) => Ok(values),
                        _ => Ok(Vec::new()),
                    }
                }
                Function::Native(native) => {
                    let native = native.clone();
                    self.call_native(native, args)
                }
            },
            other => Err(EngineError::runtime(format!(
                "attempt to call a {} value",
                other.type_name()
            ))),
        }
    }

    /// Run a native function in its own stack frame: arguments become
    /// absolute indices `1..=n`, results are the top values it reports.
    fn call_native(&mut self, f: NativeFn, args: Vec<Value>) -> EngineResult<Vec<Value>> {
        let frame_base = self.stack.len();
        self.stack.extend(args);
        let saved_base = std::mem::replace(&mut self.base, frame_base);
        let outcome = f(self);
        self.base = saved_base;
        match outcome {
            Ok(reported) => {
                let avail = self.stack.len().saturating_sub(frame_base);
                let take = reported.min(avail);
                let mut results = self.stack.split_off(self.stack.len() - take);
                self.stack.truncate(frame_base);
                results.resize(reported, Value::Nil);
                Ok(results)
            }
            Err(e) => {
                self.stack.truncate(frame_base);
                Err(e)
            }
        }
    }

    // ========================================================================
    // Statements
    // ========================================================================

    pub(crate) fn exec_block(&mut self, block: &Block, env: &Env) -> EngineResult<Flow> {
        for stat in block {
            match self.exec_stat(stat, env)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stat(&mut self, stat: &Stat, env: &Env) -> EngineResult<Flow> {
        match stat {
            Stat::Local { names, exprs } => {
                let values = self.eval_exprs_adjusted(exprs, names.len(), env)?;
                for (name, value) in names.iter().zip(values) {
                    Scope::define(env, name.as_str(), value);
                }
                Ok(Flow::Normal)
            }
            Stat::Assign { targets, exprs } => {
                let values = self.eval_exprs_adjusted(exprs, targets.len(), env)?;
                for (target, value) in targets.iter().zip(values) {
                    match target {
                        Target::Name(name) => self.assign_name(name, value, env),
                        Target::Index { obj, key } => {
                            let o = self.eval(obj, env)?;
                            let k = self.eval(key, env)?;
                            self.setindex_value(&o, &k, value)?;
                        }
                    }
                }
                Ok(Flow::Normal)
            }
            Stat::Call(expr) => {
                self.eval_call_multi(expr, env)?;
                Ok(Flow::Normal)
            }
            Stat::If { arms, else_body } => {
                for (cond, body) in arms {
                    if self.eval(cond, env)?.truthy() {
                        let scope = Scope::child(env);
                        return self.exec_block(body, &scope);
                    }
                }
                if let Some(body) = else_body {
                    let scope = Scope::child(env);
                    return self.exec_block(body, &scope);
                }
                Ok(Flow::Normal)
            }
            Stat::While { cond, body } => {
                while self.eval(cond, env)?.truthy() {
                    let scope = Scope::child(env);
                    match self.exec_block(body, &scope)? {
                        Flow::Break => break,
                        Flow::Return(vs) => return Ok(Flow::Return(vs)),
                        Flow::Normal => {}
                    }
                }
                Ok(Flow::Normal)
            }
            Stat::Repeat { body, cond } => {
                loop {
                    let scope = Scope::child(env);
                    match self.exec_block(body, &scope)? {
                        Flow::Break => break,
                        Flow::Return(vs) => return Ok(Flow::Return(vs)),
                        Flow::Normal => {}
                    }
                    // The condition sees the body's locals
                    if self.eval(cond, &scope)?.truthy() {
                        break;
                    }
                }
                Ok(Flow::Normal)
            }
            Stat::NumericFor {
                var,
                start,
                end,
                step,
                body,
            } => {
                let start = self.for_number(start, env, "initial value")?;
                let end = self.for_number(end, env, "limit")?;
                let step = match step {
                    Some(e) => self.for_number(e, env, "step")?,
                    None => 1.0,
                };
                if step == 0.0 {
                    return Err(EngineError::runtime("'for' step is zero"));
                }
                let mut i = start;
                while (step > 0.0 && i <= end) || (step < 0.0 && i >= end) {
                    let scope = Scope::child(env);
                    Scope::define(&scope, var.as_str(), Value::Number(i));
                    match self.exec_block(body, &scope)? {
                        Flow::Break => break,
                        Flow::Return(vs) => return Ok(Flow::Return(vs)),
                        Flow::Normal => {}
                    }
                    i += step;
                }
                Ok(Flow::Normal)
            }
            Stat::Function {
                path,
                method,
                proto,
            } => {
                let closure = self.make_closure(proto.clone(), env);
                match (path.as_slice(), method) {
                    ([single], None) => self.assign_name(single, closure, env),
                    _ => {
                        let mut obj = self.resolve_name(&path[0], env);
                        let middle_end = if method.is_some() {
                            path.len()
                        } else {
                            path.len() - 1
                        };
                        for part in &path[1..middle_end] {
                            let key = Value::str(part.as_str());
                            obj = self.index_value(&obj, &key)?;
                        }
                        let last = method
                            .clone()
                            .unwrap_or_else(|| path[path.len() - 1].clone());
                        self.setindex_value(&obj, &Value::str(last), closure)?;
                    }
                }
                Ok(Flow::Normal)
            }
            Stat::LocalFunction { name, proto } => {
                Scope::define(env, name.as_str(), Value::Nil);
                let closure = self.make_closure(proto.clone(), env);
                Scope::assign_existing(env, name, closure);
                Ok(Flow::Normal)
            }
            Stat::Return(exprs) => {
                let values = self.eval_exprs_multi(exprs, env)?;
                Ok(Flow::Return(values))
            }
            Stat::Break => Ok(Flow::Break),
            Stat::Do(body) => {
                let scope = Scope::child(env);
                self.exec_block(body, &scope)
            }
        }
    }

    fn for_number(&mut self, e: &Expr, env: &Env, what: &str) -> EngineResult<f64> {
        self.eval(e, env)?
            .as_number()
            .ok_or_else(|| EngineError::runtime(format!("'for' {what} must be a number")))
    }

    fn make_closure(&self, proto: crate::ast::FunctionProto, env: &Env) -> Value {
        Value::Function(Rc::new(Function::Script(ScriptFn {
            proto: Rc::new(proto),
            env: env.clone(),
        })))
    }

    fn resolve_name(&self, name: &str, env: &Env) -> Value {
        match Scope::lookup(env, name) {
            Some(v) => v,
            None => self.globals.borrow().raw_get(&Value::str(name)),
        }
    }

    fn assign_name(&mut self, name: &str, value: Value, env: &Env) {
        if !Scope::assign_existing(env, name, value.clone()) {
            // Unbound name: assignment creates/overwrites a global
            let _ = self
                .globals
                .borrow_mut()
                .raw_set(Value::str(name), value);
        }
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    fn eval(&mut self, e: &Expr, env: &Env) -> EngineResult<Value> {
        match e {
            Expr::Nil => Ok(Value::Nil),
            Expr::True => Ok(Value::Boolean(true)),
            Expr::False => Ok(Value::Boolean(false)),
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::Str(s) => Ok(Value::str(s.as_str())),
            Expr::Function(proto) => Ok(self.make_closure(proto.clone(), env)),
            Expr::Name(name) => Ok(self.resolve_name(name, env)),
            Expr::Index { obj, key } => {
                let o = self.eval(obj, env)?;
                let k = self.eval(key, env)?;
                self.index_value(&o, &k)
            }
            Expr::Call { .. } | Expr::MethodCall { .. } => Ok(self
                .eval_call_multi(e, env)?
                .into_iter()
                .next()
                .unwrap_or(Value::Nil)),
            Expr::Binary { op, lhs, rhs } => self.eval_binary(*op, lhs, rhs, env),
            Expr::Unary { op, expr } => {
                let v = self.eval(expr, env)?;
                match op {
                    UnOp::Not => Ok(Value::Boolean(!v.truthy())),
                    UnOp::Neg => v
                        .as_number()
                        .map(|n| Value::Number(-n))
                        .ok_or_else(|| {
                            EngineError::runtime(format!(
                                "attempt to perform arithmetic on a {} value",
                                v.type_name()
                            ))
                        }),
                    UnOp::Len => match &v {
                        Value::Str(s) => Ok(Value::Number(s.len() as f64)),
                        Value::Table(t) => Ok(Value::Number(t.borrow().len() as f64)),
                        other => Err(EngineError::runtime(format!(
                            "attempt to get length of a {} value",
                            other.type_name()
                        ))),
                    },
                }
            }
            Expr::Table(items) => self.eval_table(items, env),
        }
    }

    fn eval_table(&mut self, items: &[TableItem], env: &Env) -> EngineResult<Value> {
        let narr = items
            .iter()
            .filter(|i| matches!(i, TableItem::Positional(_)))
            .count();
        let table = Rc::new(RefCell::new(Table::new(narr, items.len() - narr)));
        let mut next_index = 1usize;
        for item in items {
            let (key, value) = match item {
                TableItem::Positional(e) => {
                    let key = Value::Number(next_index as f64);
                    next_index += 1;
                    (key, self.eval(e, env)?)
                }
                TableItem::Named(name, e) => (Value::str(name.as_str()), self.eval(e, env)?),
                TableItem::Keyed(k, e) => (self.eval(k, env)?, self.eval(e, env)?),
            };
            table
                .borrow_mut()
                .raw_set(key, value)
                .map_err(EngineError::runtime)?;
        }
        Ok(Value::Table(table))
    }

    fn eval_binary(
        &mut self,
        op: BinOp,
        lhs: &Expr,
        rhs: &Expr,
        env: &Env,
    ) -> EngineResult<Value> {
        // Short-circuit forms first
        match op {
            BinOp::And => {
                let l = self.eval(lhs, env)?;
                return if l.truthy() { self.eval(rhs, env) } else { Ok(l) };
            }
            BinOp::Or => {
                let l = self.eval(lhs, env)?;
                return if l.truthy() { Ok(l) } else { self.eval(rhs, env) };
            }
            _ => {}
        }
        let l = self.eval(lhs, env)?;
        let r = self.eval(rhs, env)?;
        match op {
            BinOp::Eq => Ok(Value::Boolean(l == r)),
            BinOp::Ne => Ok(Value::Boolean(l != r)),
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => compare(op, &l, &r),
            BinOp::Concat => concat(&l, &r),
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod | BinOp::Pow => {
                match arith(op, &l, &r) {
                    Ok(v) => Ok(v),
                    Err(e) => {
                        // Fall back to the operand metatables
                        let event = arith_event(op);
                        match metamethod(&l, event).or_else(|| metamethod(&r, event)) {
                            Some(handler) => Ok(self
                                .call_value(handler, vec![l, r])?
                                .into_iter()
                                .next()
                                .unwrap_or(Value::Nil)),
                            None => Err(e),
                        }
                    }
                }
            }
            BinOp::And | BinOp::Or => unreachable!("handled above"),
        }
    }

    fn eval_call_multi(&mut self, e: &Expr, env: &Env) -> EngineResult<Vec<Value>> {
        match e {
            Expr::Call { callee, args } => {
                let f = self.eval(callee, env)?;
                let argv = self.eval_exprs_multi(args, env)?;
                self.call_value(f, argv)
            }
            Expr::MethodCall { obj, name, args } => {
                let o = self.eval(obj, env)?;
                let m = self.index_value(&o, &Value::str(name.as_str()))?;
                let mut argv = vec![o];
                argv.extend(self.eval_exprs_multi(args, env)?);
                self.call_value(m, argv)
            }
            other => Ok(vec![self.eval(other, env)?]),
        }
    }

    /// Evaluate an expression list; the final call expression expands to all
    /// of its results.
    fn eval_exprs_multi(&mut self, exprs: &[Expr], env: &Env) -> EngineResult<Vec<Value>> {
        let mut values = Vec::with_capacity(exprs.len());
        for (i, e) in exprs.iter().enumerate() {
            if i + 1 == exprs.len() && e.is_multi() {
                values.extend(self.eval_call_multi(e, env)?);
            } else {
                values.push(self.eval(e, env)?);
            }
        }
        Ok(values)
    }

    fn eval_exprs_adjusted(
        &mut self,
        exprs: &[Expr],
        want: usize,
        env: &Env,
    ) -> EngineResult<Vec<Value>> {
        let mut values = self.eval_exprs_multi(exprs, env)?;
        values.resize(want, Value::Nil);
        Ok(values)
    }

    // ========================================================================
    // Index / newindex with metamethods
    // ========================================================================

    pub(crate) fn index_value(&mut self, obj: &Value, key: &Value) -> EngineResult<Value> {
        let mut current = obj.clone();
        for _ in 0..MAX_META_DEPTH {
            match &current {
                Value::Table(t) => {
                    let raw = t.borrow().raw_get(key);
                    if !raw.is_nil() {
                        return Ok(raw);
                    }
                    let meta = t.borrow().meta.clone();
                    let handler = match meta {
                        Some(m) => m.borrow().raw_get(&Value::str("__index")),
                        None => Value::Nil,
                    };
                    match handler {
                        Value::Nil => return Ok(Value::Nil),
                        h @ Value::Function(_) => {
                            let results =
                                self.call_value(h, vec![current.clone(), key.clone()])?;
                            return Ok(results.into_iter().next().unwrap_or(Value::Nil));
                        }
                        other => current = other,
                    }
                }
                Value::UserData(u) => {
                    let meta = u.borrow().meta.clone();
                    let handler = match meta {
                        Some(m) => m.borrow().raw_get(&Value::str("__index")),
                        None => Value::Nil,
                    };
                    match handler {
                        Value::Nil => {
                            return Err(EngineError::runtime(
                                "attempt to index a userdata value",
                            ))
                        }
                        h @ Value::Function(_) => {
                            let results =
                                self.call_value(h, vec![current.clone(), key.clone()])?;
                            return Ok(results.into_iter().next().unwrap_or(Value::Nil));
                        }
                        other => current = other,
                    }
                }
                other => {
                    return Err(EngineError::runtime(format!(
                        "attempt to index a {} value",
                        other.type_name()
                    )))
                }
            }
        }
        Err(EngineError::runtime("'__index' chain too long; possible loop"))
    }

    pub(crate) fn setindex_value(
        &mut self,
        obj: &Value,
        key: &Value,
        value: Value,
    ) -> EngineResult<()> {
        let mut current = obj.clone();
        for _ in 0..MAX_META_DEPTH {
            match &current {
                Value::Table(t) => {
                    let present = !t.borrow().raw_get(key).is_nil();
                    let meta = t.borrow().meta.clone();
                    let handler = if present {
                        Value::Nil
                    } else {
                        match meta {
                            Some(m) => m.borrow().raw_get(&Value::str("__newindex")),
                            None => Value::Nil,
                        }
                    };
                    match handler {
                        Value::Nil => {
                            return t
                                .borrow_mut()
                                .raw_set(key.clone(), value)
                                .map_err(EngineError::runtime);
                        }
                        h @ Value::Function(_) => {
                            self.call_value(
                                h,
                                vec![current.clone(), key.clone(), value],
                            )?;
                            return Ok(());
                        }
                        other => current = other,
                    }
                }
                Value::UserData(u) => {
                    let meta = u.borrow().meta.clone();
                    let handler = match meta {
                        Some(m) => m.borrow().raw_get(&Value::str("__newindex")),
                        None => Value::Nil,
                    };
                    match handler {
                        Value::Nil => {
                            return Err(EngineError::runtime(
                                "attempt to index a userdata value",
                            ))
                        }
                        h @ Value::Function(_) => {
                            self.call_value(
                                h,
                                vec![current.clone(), key.clone(), value],
                            )?;
                            return Ok(());
                        }
                        other => current = other,
                    }
                }
                other => {
                    return Err(EngineError::runtime(format!(
                        "attempt to index a {} value",
                        other.type_name()
                    )))
                }
            }
        }
        Err(EngineError::runtime(
            "'__newindex' chain too long; possible loop",
        ))
    }
}

// ============================================================================
// Operator helpers
// ============================================================================

fn arith_event(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "__add",
        BinOp::Sub => "__sub",
        BinOp::Mul => "__mul",
        BinOp::Div => "__div",
        BinOp::Mod => "__mod",
        BinOp::Pow => "__pow",
        _ => "",
    }
}

fn metamethod(v: &Value, event: &str) -> Option<Value> {
    let meta = v.metatable()?;
    let handler = meta.borrow().raw_get(&Value::str(event));
    if handler.is_nil() {
        None
    } else {
        Some(handler)
    }
}

fn arith(op: BinOp, l: &Value, r: &Value) -> EngineResult<Value> {
    let (a, b) = match (l.as_number(), r.as_number()) {
        (Some(a), Some(b)) => (a, b),
        _ => {
            let bad = if l.as_number().is_none() { l } else { r };
            return Err(EngineError::runtime(format!(
                "attempt to perform arithmetic on a {} value",
                bad.type_name()
            )));
        }
    };
    let n = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => a / b,
        BinOp::Mod => a - (a / b).floor() * b,
        BinOp::Pow => a.powf(b),
        _ => unreachable!("not an arithmetic operator"),
    };
    Ok(Value::Number(n))
}

fn compare(op: BinOp, l: &Value, r: &Value) -> EngineResult<Value> {
    let ord = match (l, r) {
        (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        _ => {
            return Err(EngineError::runtime(format!(
                "attempt to compare {} with {}",
                l.type_name(),
                r.type_name()
            )))
        }
    };
    let result = match (op, ord) {
        (_, None) => false, // NaN comparisons
        (BinOp::Lt, Some(o)) => o.is_lt(),
        (BinOp::Le, Some(o)) => o.is_le(),
        (BinOp::Gt, Some(o)) => o.is_gt(),
        (BinOp::Ge, Some(o)) => o.is_ge(),
        _ => unreachable!("not a comparison operator"),
    };
    Ok(Value::Boolean(result))
}

fn concat(l: &Value, r: &Value) -> EngineResult<Value> {
    let part = |v: &Value| -> EngineResult<String> {
        match v {
            Value::Str(s) => Ok(s.to_string()),
            Value::Number(n) => Ok(crate::value::number_to_string(*n)),
            other => Err(EngineError::runtime(format!(
                "attempt to concatenate a {} value",
                other.type_name()
            ))),
        }
    };
    Ok(Value::str(format!("{}{}", part(l)?, part(r)?)))
}
