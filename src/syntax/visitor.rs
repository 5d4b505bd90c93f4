//! Full-tree traversal over statements, expressions and patterns.
//!
//! Implementors override only the hooks they care about. Each `visit_*`
//! hook runs before the node's children; return `false` to skip them. The
//! matching `leave_*` hook runs after the children of a visited node.

use super::ast::*;

pub trait Visitor {
    fn visit_stmt(&mut self, _stmt: &Stmt) -> bool {
        true
    }

    fn visit_expr(&mut self, _expr: &Expr) -> bool {
        true
    }

    fn visit_pattern(&mut self, _pattern: &Pattern) -> bool {
        true
    }

    fn leave_stmt(&mut self, _stmt: &Stmt) {}

    fn leave_expr(&mut self, _expr: &Expr) {}

    fn leave_pattern(&mut self, _pattern: &Pattern) {}
}

pub fn walk_body<V: Visitor + ?Sized>(visitor: &mut V, body: &[Stmt]) {
    for stmt in body {
        walk_stmt(visitor, stmt);
    }
}

pub fn walk_stmt<V: Visitor + ?Sized>(visitor: &mut V, stmt: &Stmt) {
    if visitor.visit_stmt(stmt) {
        walk_stmt_children(visitor, stmt);
        visitor.leave_stmt(stmt);
    }
}

fn walk_stmt_children<V: Visitor + ?Sized>(visitor: &mut V, stmt: &Stmt) {
    match &stmt.kind {
        StmtKind::FunctionDef(func) => {
            walk_exprs(visitor, &func.decorators);
            walk_parameters(visitor, &func.params);
            walk_opt(visitor, func.returns.as_ref());
            walk_body(visitor, &func.body);
        }
        StmtKind::ClassDef(class) => {
            walk_exprs(visitor, &class.decorators);
            walk_exprs(visitor, &class.bases);
            for kw in &class.keywords {
                walk_expr(visitor, &kw.value);
            }
            walk_body(visitor, &class.body);
        }
        StmtKind::Return(value) => walk_opt(visitor, value.as_ref()),
        StmtKind::Delete(targets) => walk_exprs(visitor, targets),
        StmtKind::Assign { targets, value } => {
            walk_exprs(visitor, targets);
            walk_expr(visitor, value);
        }
        StmtKind::AugAssign { target, value, .. } => {
            walk_expr(visitor, target);
            walk_expr(visitor, value);
        }
        StmtKind::AnnAssign {
            target,
            annotation,
            value,
        } => {
            walk_expr(visitor, target);
            walk_expr(visitor, annotation);
            walk_opt(visitor, value.as_ref());
        }
        StmtKind::For {
            target,
            iter,
            body,
            orelse,
            ..
        } => {
            walk_expr(visitor, target);
            walk_expr(visitor, iter);
            walk_body(visitor, body);
            walk_body(visitor, orelse);
        }
        StmtKind::While { test, body, orelse } | StmtKind::If { test, body, orelse } => {
            walk_expr(visitor, test);
            walk_body(visitor, body);
            walk_body(visitor, orelse);
        }
        StmtKind::With { items, body, .. } => {
            for item in items {
                walk_expr(visitor, &item.context);
                walk_opt(visitor, item.optional_vars.as_ref());
            }
            walk_body(visitor, body);
        }
        StmtKind::Match { subject, cases } => {
            walk_expr(visitor, subject);
            for case in cases {
                walk_pattern(visitor, &case.pattern);
                walk_opt(visitor, case.guard.as_ref());
                walk_body(visitor, &case.body);
            }
        }
        StmtKind::Raise { exc, cause } => {
            walk_opt(visitor, exc.as_ref());
            walk_opt(visitor, cause.as_ref());
        }
        StmtKind::Try {
            body,
            handlers,
            orelse,
            finalbody,
            ..
        } => {
            walk_body(visitor, body);
            for handler in handlers {
                walk_opt(visitor, handler.type_.as_ref());
                walk_body(visitor, &handler.body);
            }
            walk_body(visitor, orelse);
            walk_body(visitor, finalbody);
        }
        StmtKind::Assert { test, msg } => {
            walk_expr(visitor, test);
            walk_opt(visitor, msg.as_ref());
        }
        StmtKind::Expr(expr) => walk_expr(visitor, expr),
        StmtKind::Import(_)
        | StmtKind::ImportFrom { .. }
        | StmtKind::Global(_)
        | StmtKind::Nonlocal(_)
        | StmtKind::Pass
        | StmtKind::Break
        | StmtKind::Continue => {}
    }
}

pub fn walk_expr<V: Visitor + ?Sized>(visitor: &mut V, expr: &Expr) {
    if visitor.visit_expr(expr) {
        walk_expr_children(visitor, expr);
        visitor.leave_expr(expr);
    }
}

fn walk_expr_children<V: Visitor + ?Sized>(visitor: &mut V, expr: &Expr) {
    match &expr.kind {
        ExprKind::BoolOp { values, .. } => walk_exprs(visitor, values),
        ExprKind::NamedExpr { target, value } => {
            walk_expr(visitor, target);
            walk_expr(visitor, value);
        }
        ExprKind::BinOp { left, right, .. } => {
            walk_expr(visitor, left);
            walk_expr(visitor, right);
        }
        ExprKind::UnaryOp { operand, .. } => walk_expr(visitor, operand),
        ExprKind::Lambda { params, body } => {
            walk_parameters(visitor, params);
            walk_expr(visitor, body);
        }
        ExprKind::IfExp { test, body, orelse } => {
            walk_expr(visitor, test);
            walk_expr(visitor, body);
            walk_expr(visitor, orelse);
        }
        ExprKind::Dict { keys, values } => {
            for key in keys.iter().flatten() {
                walk_expr(visitor, key);
            }
            walk_exprs(visitor, values);
        }
        ExprKind::Set(elts) => walk_exprs(visitor, elts),
        ExprKind::ListComp { elt, generators }
        | ExprKind::SetComp { elt, generators }
        | ExprKind::GeneratorExp { elt, generators } => {
            walk_generators(visitor, generators);
            walk_expr(visitor, elt);
        }
        ExprKind::DictComp {
            key,
            value,
            generators,
        } => {
            walk_generators(visitor, generators);
            walk_expr(visitor, key);
            walk_expr(visitor, value);
        }
        ExprKind::Await(value) | ExprKind::YieldFrom(value) => walk_expr(visitor, value),
        ExprKind::Yield(value) => {
            if let Some(value) = value {
                walk_expr(visitor, value);
            }
        }
        ExprKind::Compare {
            left, comparators, ..
        } => {
            walk_expr(visitor, left);
            walk_exprs(visitor, comparators);
        }
        ExprKind::Call {
            func,
            args,
            keywords,
        } => {
            walk_expr(visitor, func);
            walk_exprs(visitor, args);
            for kw in keywords {
                walk_expr(visitor, &kw.value);
            }
        }
        ExprKind::FString { values, .. } => walk_exprs(visitor, values),
        ExprKind::Attribute { value, .. } | ExprKind::Starred { value, .. } => {
            walk_expr(visitor, value);
        }
        ExprKind::Subscript { value, slice, .. } => {
            walk_expr(visitor, value);
            walk_expr(visitor, slice);
        }
        ExprKind::List { elts, .. } | ExprKind::Tuple { elts, .. } => walk_exprs(visitor, elts),
        ExprKind::Slice { lower, upper, step } => {
            for part in [lower, upper, step].into_iter().flatten() {
                walk_expr(visitor, part);
            }
        }
        ExprKind::Constant(_) | ExprKind::Name { .. } => {}
    }
}

pub fn walk_pattern<V: Visitor + ?Sized>(visitor: &mut V, pattern: &Pattern) {
    if visitor.visit_pattern(pattern) {
        walk_pattern_children(visitor, pattern);
        visitor.leave_pattern(pattern);
    }
}

fn walk_pattern_children<V: Visitor + ?Sized>(visitor: &mut V, pattern: &Pattern) {
    match pattern {
        Pattern::Value(expr) => walk_expr(visitor, expr),
        Pattern::Singleton(_) | Pattern::Star(_) => {}
        Pattern::Sequence(patterns) | Pattern::Or(patterns) => {
            for p in patterns {
                walk_pattern(visitor, p);
            }
        }
        Pattern::Mapping { keys, patterns, .. } => {
            walk_exprs(visitor, keys);
            for p in patterns {
                walk_pattern(visitor, p);
            }
        }
        Pattern::Class {
            cls,
            patterns,
            kwd_patterns,
            ..
        } => {
            walk_expr(visitor, cls);
            for p in patterns.iter().chain(kwd_patterns) {
                walk_pattern(visitor, p);
            }
        }
        Pattern::As { pattern, .. } => {
            if let Some(p) = pattern {
                walk_pattern(visitor, p);
            }
        }
    }
}

/// Annotations and default values of a parameter list.
pub fn walk_parameters<V: Visitor + ?Sized>(visitor: &mut V, params: &Parameters) {
    let all = params
        .posonly
        .iter()
        .chain(&params.args)
        .chain(&params.vararg)
        .chain(&params.kwonly)
        .chain(&params.kwarg);
    for param in all {
        walk_opt(visitor, param.annotation.as_ref());
    }
    walk_exprs(visitor, &params.defaults);
    for default in params.kw_defaults.iter().flatten() {
        walk_expr(visitor, default);
    }
}

fn walk_generators<V: Visitor + ?Sized>(visitor: &mut V, generators: &[Comprehension]) {
    for gen in generators {
        walk_expr(visitor, &gen.target);
        walk_expr(visitor, &gen.iter);
        walk_exprs(visitor, &gen.ifs);
    }
}

fn walk_exprs<V: Visitor + ?Sized>(visitor: &mut V, exprs: &[Expr]) {
    for expr in exprs {
        walk_expr(visitor, expr);
    }
}

fn walk_opt<V: Visitor + ?Sized>(visitor: &mut V, expr: Option<&Expr>) {
    if let Some(expr) = expr {
        walk_expr(visitor, expr);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::super::parse_module;
    use super::*;

    #[derive(Default)]
    struct NameCollector {
        names: Vec<String>,
        skip_functions: bool,
    }

    impl Visitor for NameCollector {
        fn visit_stmt(&mut self, stmt: &Stmt) -> bool {
            !(self.skip_functions && matches!(stmt.kind, StmtKind::FunctionDef(_)))
        }

        fn visit_expr(&mut self, expr: &Expr) -> bool {
            if let ExprKind::Name { id, .. } = &expr.kind {
                self.names.push(id.clone());
            }
            true
        }

        fn visit_pattern(&mut self, pattern: &Pattern) -> bool {
            if let Pattern::As { name: Some(n), .. } = pattern {
                self.names.push(format!("capture:{n}"));
            }
            true
        }
    }

    #[test]
    fn collects_names_at_every_depth() {
        let m = parse_module(
            "def f(a: T = d):\n    return [g(x) for x in xs]\nmsg = f\"{who}\"\nmatch v:\n    case [y]:\n        pass\n",
        )
        .unwrap();
        let mut v = NameCollector::default();
        walk_body(&mut v, &m.body);
        for name in ["T", "d", "g", "x", "xs", "who", "msg", "v", "capture:y"] {
            assert!(v.names.iter().any(|n| n == name), "missing {name}: {:?}", v.names);
        }
    }

    #[derive(Default)]
    struct DepthMeter {
        depth: usize,
        deepest: usize,
    }

    impl Visitor for DepthMeter {
        fn visit_expr(&mut self, _expr: &Expr) -> bool {
            self.depth += 1;
            self.deepest = self.deepest.max(self.depth);
            true
        }

        fn leave_expr(&mut self, _expr: &Expr) {
            self.depth -= 1;
        }
    }

    #[test]
    fn leave_hooks_pair_with_visits() {
        let m = parse_module("x = -(-(a + b))
y = c
").unwrap();
        let mut v = DepthMeter::default();
        walk_body(&mut v, &m.body);
        // UnaryOp -> UnaryOp -> BinOp -> Name
        assert_eq!(v.deepest, 4);
        assert_eq!(v.depth, 0);
    }

    #[test]
    fn returning_false_skips_children() {
        let m = parse_module("def f():\n    inner\nouter\n").unwrap();
        let mut v = NameCollector {
            skip_functions: true,
            ..Default::default()
        };
        walk_body(&mut v, &m.body);
        assert_eq!(v.names, vec!["outer".to_string()]);
    }
}
