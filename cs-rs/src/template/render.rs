//! Statement execution.

use std::mem;

use tracing::{debug, instrument, warn};

use crate::error::{CsError, Result};

use super::escape::EscapeMode;
use super::expr::Expr;
use super::parser::{Block, StackEntry};
use super::scope::{split_first, Binding, Bound, NodeRef};
use super::session::{OutputSink, Session};
use super::stmt::Stmt;
use super::value::Value;

impl Session {
    /// Execute the parsed tree, writing output to `sink`.
    ///
    /// Output already emitted when an error occurs is not retracted.
    #[instrument(skip_all)]
    pub fn render(&mut self, sink: &mut dyn OutputSink) -> Result<()> {
        let tree = match self.stack.first_mut() {
            Some(StackEntry { block: Block::Root(body), .. }) => mem::take(body),
            _ => return Err(CsError::Assert("no parse tree exists".into())),
        };
        let result = self.render_block(&tree, sink);
        if let Some(StackEntry { block: Block::Root(body), .. }) = self.stack.first_mut() {
            *body = tree;
        }
        result
    }

    /// Render into a new string.
    pub fn render_to_string(&mut self) -> Result<String> {
        let mut out = String::new();
        self.render(&mut out)?;
        Ok(out)
    }

    fn render_block(&mut self, body: &[Stmt], sink: &mut dyn OutputSink) -> Result<()> {
        for stmt in body {
            self.render_stmt(stmt, sink)?;
        }
        Ok(())
    }

    fn render_stmt(&mut self, stmt: &Stmt, sink: &mut dyn OutputSink) -> Result<()> {
        match stmt {
            Stmt::Literal(text) => sink.emit(text),
            Stmt::Name(name) => match self.lookup_node(name) {
                Some(node) => sink.emit(&self.node_name(node)),
                None => Ok(()),
            },
            Stmt::Var { expr, escape } => self.render_var(expr, *escape, sink),
            Stmt::Lvar(expr) => {
                let value = self.eval(expr)?;
                if value.is_numeric() {
                    return sink.emit(&self.value_num(&value).to_string());
                }
                let Some(text) = self.value_str(&value) else { return Ok(()) };
                let mut child = self.child()?;
                child.parse_str(&text)?;
                child.render(sink)
            }
            Stmt::Linclude { expr, required } => {
                let value = self.eval(expr)?;
                if value.is_numeric() {
                    return sink.emit(&self.value_num(&value).to_string());
                }
                let Some(path) = self.value_str(&value) else { return Ok(()) };
                let mut child = self.child()?;
                match child.parse_file(&path) {
                    Err(e) if !required && e.is_not_found() => {
                        debug!(path = %path, "optional linclude not found");
                        Ok(())
                    }
                    Err(e) => Err(e),
                    Ok(()) => child.render(sink),
                }
            }
            Stmt::If { cond, then_block, else_block } => {
                let value = self.eval(cond)?;
                if self.value_bool(&value) {
                    self.render_block(then_block, sink)
                } else {
                    self.render_block(else_block, sink)
                }
            }
            Stmt::Each { var, expr, body } => {
                let value = self.eval(expr)?;
                let Value::Var(name) = value else { return Ok(()) };
                let Some(parent) = self.lookup_node(&name) else { return Ok(()) };
                self.scope.push(Binding::node(var, parent));
                let result = self.render_each(var, parent, body, sink);
                self.scope.pop();
                result
            }
            Stmt::With { var, expr, body } => {
                let value = self.eval(expr)?;
                let Value::Var(name) = value else {
                    warn!(kind = value.kind(), "invalid value for with");
                    return Ok(());
                };
                let Some(node) = self.lookup_node(&name) else { return Ok(()) };
                self.scope.push(Binding::node(var, node));
                let result = self.render_block(body, sink);
                self.scope.pop();
                result
            }
            Stmt::Loop { var, args, body } => self.render_loop(var, args, body, sink),
            Stmt::Call { name, args, escape } => self.render_call(name, args, *escape, sink),
            Stmt::Set { target, value } => self.render_set(target, value),
            Stmt::Alt { expr, body } => {
                let value = self.eval(expr)?;
                if !self.value_bool(&value) {
                    return self.render_block(body, sink);
                }
                match self.value_text(&value) {
                    Some(text) => sink.emit(&text),
                    None => Ok(()),
                }
            }
            Stmt::Escape { body, .. } => self.render_block(body, sink),
        }
    }

    fn render_var(&mut self, expr: &Expr, escape: EscapeMode, sink: &mut dyn OutputSink) -> Result<()> {
        self.escaping.explicit = false;
        let value = self.eval(expr)?;
        if value.is_numeric() {
            return sink.emit(&self.value_num(&value).to_string());
        }
        let Some(text) = self.value_str(&value) else { return Ok(()) };
        if self.escaping.explicit {
            return sink.emit(&text);
        }
        let mode = match escape {
            EscapeMode::Undef => self.escaping.when_undef,
            mode => mode,
        };
        sink.emit(&mode.apply(&text))
    }

    fn render_each(&mut self, var: &str, parent: NodeRef, body: &[Stmt], sink: &mut dyn OutputSink) -> Result<()> {
        let mut cur = self.first_child(parent);
        let mut first = true;
        while let Some(child) = cur {
            let mut binding = Binding::node(var, child);
            binding.first = first;
            self.scope.rebind(binding);
            self.render_block(body, sink)?;
            first = false;
            cur = self.next_sibling(child);
        }
        Ok(())
    }

    fn render_loop(&mut self, var: &str, args: &[Expr], body: &[Stmt], sink: &mut dyn OutputSink) -> Result<()> {
        let mut nums = Vec::with_capacity(args.len());
        for arg in args {
            let value = self.eval(arg)?;
            nums.push(self.value_num(&value));
        }
        let (start, end, step) = match nums[..] {
            [end] => (0, end, 1),
            [start, end] => (start, end, 1),
            [start, end, step] => (start, end, step),
            _ => return Err(CsError::Assert(format!("loop over {var} takes 1 to 3 arguments"))),
        };
        let count = loop_count(start, end, step);
        if count == 0 {
            return Ok(());
        }
        self.scope.push(Binding::new(var, Bound::Num(start)));
        let mut n = start;
        let mut result = Ok(());
        for i in 0..count {
            self.scope.rebind(Binding {
                name: var.to_owned(),
                value: Bound::Num(n),
                first: i == 0,
                last: i + 1 == count,
            });
            result = self.render_block(body, sink);
            if result.is_err() {
                break;
            }
            n = n.wrapping_add(step);
        }
        self.scope.pop();
        result
    }

    fn render_call(&mut self, name: &str, args: &[Expr], escape: EscapeMode, sink: &mut dyn OutputSink) -> Result<()> {
        let Some(mac) = self.macros.get(name) else {
            return Err(CsError::Assert(format!("macro {name} is not defined")));
        };
        let mut bindings = Vec::with_capacity(args.len());
        for (param, arg) in mac.params.iter().zip(args) {
            let value = self.eval(arg)?;
            bindings.push(Binding::new(param.as_str(), self.bind_value(value)));
        }

        let saved = self.escaping.when_undef;
        if escape != EscapeMode::Undef {
            self.escaping.when_undef = escape;
        }
        self.scope.push_opaque(bindings);
        let result = self.render_block(&mac.body, sink);
        self.scope.pop();
        self.escaping.when_undef = saved;
        result
    }

    /// What a macro parameter binds to, given its evaluated argument.
    fn bind_value(&self, value: Value) -> Bound {
        match value {
            Value::Str(s) => Bound::Str(Some(s)),
            Value::Null => Bound::Str(None),
            Value::Num(n) => Bound::Num(n),
            Value::Var(name) | Value::VarNum(name) => {
                let (head, _) = split_first(&name);
                match self.scope.find(head).map(|b| &b.value) {
                    Some(Bound::Str(s)) => Bound::Str(s.clone()),
                    Some(Bound::Num(n)) => Bound::Num(*n),
                    _ => Bound::Node { node: self.lookup_node(&name), path: name },
                }
            }
        }
    }

    fn render_set(&mut self, target: &Expr, value: &Expr) -> Result<()> {
        let target = self.eval(target)?;
        let value = self.eval(value)?;
        let text = self.value_text(&value);
        let name = match target {
            Value::Var(name) | Value::VarNum(name) => name,
            Value::Str(name) => {
                warn!(target = %name, "string literal used as set target");
                name
            }
            Value::Num(n) => {
                warn!(target = n, "ignoring set of a numeric target");
                return Ok(());
            }
            Value::Null => String::new(),
        };
        if name.is_empty() {
            return Err(CsError::Assert(format!(
                "lvalue is NULL/empty in attempt to evaluate set to '{}'",
                text.unwrap_or_default()
            )));
        }
        self.var_set_value(&name, text.as_deref())
    }
}

/// Iterations of `loop:` from `start` to `end` inclusive by `step`.
fn loop_count(start: i64, end: i64, step: i64) -> u64 {
    if step == 0 || (step < 0 && start < end) || (step > 0 && end < start) {
        return 0;
    }
    end.wrapping_sub(start).wrapping_div(step).wrapping_add(1).unsigned_abs()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
