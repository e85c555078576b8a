use crate::ast::{
    BoolOperator, CmpOperator, Expr, Module, NameConstant, Number, Operator, Stmt, UnaryOperator,
};
use crate::visitor::Visitor;

/// Pretty-printer turning a syntax tree back into source text.
///
/// This is the output stage of the transform pipeline, so it favours
/// unambiguous output over minimal output: every binary/boolean/conditional
/// expression is parenthesised and tuples always keep their parentheses.
pub struct CodeFormatter {
    indent_level: usize,
    indent_size: usize,
    output: String,
}

/// Formats a whole module with the default indent width.
pub fn format_module(module: &Module) -> String {
    let mut formatter = CodeFormatter::new(4);
    formatter.visit_module(module);
    formatter.into_output()
}

impl CodeFormatter {
    pub fn new(indent_size: usize) -> Self {
        CodeFormatter {
            indent_level: 0,
            indent_size,
            output: String::new(),
        }
    }

    pub fn get_output(&self) -> &str {
        &self.output
    }

    pub fn into_output(self) -> String {
        self.output
    }

    fn indent(&self) -> String {
        " ".repeat(self.indent_level * self.indent_size)
    }

    fn write(&mut self, text: &str) {
        self.output.push_str(text);
    }

    fn write_indented(&mut self, text: &str) {
        self.output.push_str(&self.indent());
        self.output.push_str(text);
    }

    fn write_line(&mut self, text: &str) {
        self.write_indented(text);
        self.output.push('\n');
    }

    fn increase_indent(&mut self) {
        self.indent_level += 1;
    }

    fn decrease_indent(&mut self) {
        if self.indent_level > 0 {
            self.indent_level -= 1;
        }
    }

    fn write_int(&mut self, value: i64) {
        let mut buffer = itoa::Buffer::new();
        self.output.push_str(buffer.format(value));
    }

    fn write_float(&mut self, value: f64) {
        let mut buffer = ryu::Buffer::new();
        self.output.push_str(buffer.format(value));
    }

    fn write_str_literal(&mut self, value: &str) {
        self.output.push('"');
        for c in value.chars() {
            match c {
                '"' => self.output.push_str("\\\""),
                '\\' => self.output.push_str("\\\\"),
                '\n' => self.output.push_str("\\n"),
                '\t' => self.output.push_str("\\t"),
                '\r' => self.output.push_str("\\r"),
                other => self.output.push(other),
            }
        }
        self.output.push('"');
    }

    fn format_operator(&self, op: &Operator) -> &'static str {
        match op {
            Operator::Add => "+",
            Operator::Sub => "-",
            Operator::Mult => "*",
            Operator::Div => "/",
            Operator::FloorDiv => "//",
            Operator::Mod => "%",
            Operator::Pow => "**",
        }
    }

    fn format_unary_operator(&self, op: &UnaryOperator) -> &'static str {
        match op {
            UnaryOperator::Not => "not ",
            UnaryOperator::UAdd => "+",
            UnaryOperator::USub => "-",
        }
    }

    fn format_bool_operator(&self, op: &BoolOperator) -> &'static str {
        match op {
            BoolOperator::And => "and",
            BoolOperator::Or => "or",
        }
    }

    fn format_cmp_operator(&self, op: &CmpOperator) -> &'static str {
        match op {
            CmpOperator::Eq => "==",
            CmpOperator::NotEq => "!=",
            CmpOperator::Lt => "<",
            CmpOperator::LtE => "<=",
            CmpOperator::Gt => ">",
            CmpOperator::GtE => ">=",
            CmpOperator::In => "in",
            CmpOperator::NotIn => "not in",
        }
    }

    fn write_body(&mut self, body: &[Box<Stmt>]) {
        self.increase_indent();
        if body.is_empty() {
            self.write_line("pass");
        } else {
            for stmt in body {
                self.visit_stmt(stmt);
            }
        }
        self.decrease_indent();
    }
}

impl<'ast> Visitor<'ast, ()> for CodeFormatter {
    fn visit_module(&mut self, module: &'ast Module) {
        for (i, stmt) in module.body.iter().enumerate() {
            self.visit_stmt(stmt);

            // Blank-line policy between top-level statements: two after a
            // function definition, none between consecutive simple
            // statements of the same kind, one otherwise.
            if i < module.body.len() - 1 {
                match (stmt.as_ref(), module.body[i + 1].as_ref()) {
                    (Stmt::Expr { .. }, Stmt::Expr { .. }) => {}
                    (Stmt::Assign { .. }, Stmt::Assign { .. }) => {}
                    (Stmt::AugAssign { .. }, Stmt::AugAssign { .. }) => {}
                    (Stmt::FunctionDef { .. }, _) => self.write("\n\n"),
                    _ => self.write("\n"),
                }
            }
        }
    }

    fn visit_stmt(&mut self, stmt: &'ast Stmt) {
        match stmt {
            Stmt::FunctionDef {
                name,
                params,
                body,
                decorator_list,
                line: _,
                column: _,
            } => {
                for decorator in decorator_list {
                    self.write_indented("@");
                    self.write(decorator);
                    self.write("\n");
                }

                self.write_indented("def ");
                self.write(name);
                self.write("(");
                for (i, param) in params.iter().enumerate() {
                    if i > 0 {
                        self.write(", ");
                    }
                    self.visit_parameter(param);
                }
                self.write("):\n");
                self.write_body(body);
            }
            Stmt::Return {
                value,
                line: _,
                column: _,
            } => {
                self.write_indented("return");
                if let Some(value) = value {
                    self.write(" ");
                    self.visit_expr(value);
                }
                self.write("\n");
            }
            Stmt::Assign {
                target,
                value,
                line: _,
                column: _,
            } => {
                self.write_indented("");
                self.visit_expr(target);
                self.write(" = ");
                self.visit_expr(value);
                self.write("\n");
            }
            Stmt::AugAssign {
                target,
                op,
                value,
                line: _,
                column: _,
            } => {
                self.write_indented("");
                self.visit_expr(target);
                self.write(" ");
                self.write(self.format_operator(op));
                self.write("= ");
                self.visit_expr(value);
                self.write("\n");
            }
            Stmt::If {
                test,
                body,
                orelse,
                line: _,
                column: _,
            } => {
                self.write_indented("if ");
                self.visit_expr(test);
                self.write(":\n");
                self.write_body(body);

                // A lone nested `if` in an else-branch prints as `elif`.
                let mut pending = orelse;
                loop {
                    if pending.len() == 1 {
                        if let Stmt::If {
                            test,
                            body,
                            orelse,
                            ..
                        } = pending[0].as_ref()
                        {
                            self.write_indented("elif ");
                            self.visit_expr(test);
                            self.write(":\n");
                            self.write_body(body);
                            pending = orelse;
                            continue;
                        }
                    }
                    if !pending.is_empty() {
                        self.write_line("else:");
                        self.write_body(pending);
                    }
                    break;
                }
            }
            Stmt::While {
                test,
                body,
                line: _,
                column: _,
            } => {
                self.write_indented("while ");
                self.visit_expr(test);
                self.write(":\n");
                self.write_body(body);
            }
            Stmt::For {
                target,
                iter,
                body,
                line: _,
                column: _,
            } => {
                self.write_indented("for ");
                self.visit_expr(target);
                self.write(" in ");
                self.visit_expr(iter);
                self.write(":\n");
                self.write_body(body);
            }
            Stmt::Global {
                names,
                line: _,
                column: _,
            } => {
                self.write_indented("global ");
                for (i, name) in names.iter().enumerate() {
                    if i > 0 {
                        self.write(", ");
                    }
                    self.write(name);
                }
                self.write("\n");
            }
            Stmt::Expr {
                value,
                line: _,
                column: _,
            } => {
                self.write_indented("");
                self.visit_expr(value);
                self.write("\n");
            }
            Stmt::Pass { .. } => self.write_line("pass"),
            Stmt::Break { .. } => self.write_line("break"),
            Stmt::Continue { .. } => self.write_line("continue"),
        }
    }

    fn visit_expr(&mut self, expr: &'ast Expr) {
        match expr {
            Expr::BoolOp { op, values, .. } => {
                let op_str = self.format_bool_operator(op);
                self.write("(");
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        self.write(" ");
                        self.write(op_str);
                        self.write(" ");
                    }
                    self.visit_expr(value);
                }
                self.write(")");
            }
            Expr::BinOp {
                left, op, right, ..
            } => {
                self.write("(");
                self.visit_expr(left);
                self.write(" ");
                self.write(self.format_operator(op));
                self.write(" ");
                self.visit_expr(right);
                self.write(")");
            }
            Expr::UnaryOp { op, operand, .. } => {
                self.write("(");
                self.write(self.format_unary_operator(op));
                self.visit_expr(operand);
                self.write(")");
            }
            Expr::IfExp {
                test, body, orelse, ..
            } => {
                self.write("(");
                self.visit_expr(body);
                self.write(" if ");
                self.visit_expr(test);
                self.write(" else ");
                self.visit_expr(orelse);
                self.write(")");
            }
            Expr::Compare {
                left,
                ops,
                comparators,
                ..
            } => {
                self.visit_expr(left);
                for (op, comparator) in ops.iter().zip(comparators.iter()) {
                    self.write(" ");
                    self.write(self.format_cmp_operator(op));
                    self.write(" ");
                    self.visit_expr(comparator);
                }
            }
            Expr::Call {
                func,
                args,
                keywords,
                ..
            } => {
                self.visit_expr(func);
                self.write("(");
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        self.write(", ");
                    }
                    self.visit_expr(arg);
                }
                if !args.is_empty() && !keywords.is_empty() {
                    self.write(", ");
                }
                for (i, (key, value)) in keywords.iter().enumerate() {
                    if i > 0 {
                        self.write(", ");
                    }
                    self.write(key);
                    self.write("=");
                    self.visit_expr(value);
                }
                self.write(")");
            }
            Expr::Num { value, .. } => match value {
                Number::Integer(i) => self.write_int(*i),
                Number::Float(f) => self.write_float(*f),
            },
            Expr::Str { value, .. } => self.write_str_literal(value),
            Expr::NameConstant { value, .. } => match value {
                NameConstant::None => self.write("None"),
                NameConstant::True => self.write("True"),
                NameConstant::False => self.write("False"),
            },
            Expr::Attribute { value, attr, .. } => {
                self.visit_expr(value);
                self.write(".");
                self.write(attr);
            }
            Expr::Subscript { value, index, .. } => {
                self.visit_expr(value);
                self.write("[");
                self.visit_expr(index);
                self.write("]");
            }
            Expr::Name { id, .. } => self.write(id),
            Expr::List { elts, .. } => {
                self.write("[");
                for (i, elt) in elts.iter().enumerate() {
                    if i > 0 {
                        self.write(", ");
                    }
                    self.visit_expr(elt);
                }
                self.write("]");
            }
            Expr::Tuple { elts, .. } => {
                self.write("(");
                for (i, elt) in elts.iter().enumerate() {
                    if i > 0 {
                        self.write(", ");
                    }
                    self.visit_expr(elt);
                }
                if elts.len() == 1 {
                    self.write(",");
                }
                self.write(")");
            }
            Expr::Dict { keys, values, .. } => {
                self.write("{");
                for (i, (key, value)) in keys.iter().zip(values.iter()).enumerate() {
                    if i > 0 {
                        self.write(", ");
                    }
                    self.visit_expr(key);
                    self.write(": ");
                    self.visit_expr(value);
                }
                self.write("}");
            }
        }
    }

    fn visit_parameter(&mut self, param: &'ast crate::ast::Parameter) {
        self.write(&param.name);
        if let Some(default) = &param.default {
            self.write("=");
            self.visit_expr(default);
        }
    }
}
