//! Expression-to-SQL compiler
//!
//! Lowers an [`Expr`] against one [`TableMapping`] into SQL text with `?`
//! placeholders. Sub-expressions are compiled in the order their text is
//! emitted, so the argument list always lines up 1:1 with the
//! placeholders.

use crate::core::error::{OrmError, Result};
use crate::core::expr::{BinaryOp, Expr, Method};
use crate::core::mapping::TableMapping;
use crate::core::value::{ColumnType, FieldValue};

/// Compiled fragment of an expression
#[derive(Debug, Clone, PartialEq)]
pub struct CompileResult {
    /// SQL text of the fragment
    pub sql: String,
    /// Evaluated value when the fragment is a single bound argument
    pub value: Option<FieldValue>,
}

impl CompileResult {
    fn text(sql: String) -> Self {
        Self { sql, value: None }
    }

    fn is_null_argument(&self) -> bool {
        self.sql == "?" && matches!(self.value, Some(FieldValue::Null))
    }
}

/// Accumulates positional arguments while compiling expressions
#[derive(Debug)]
pub struct QueryCompiler<'m> {
    mapping: &'m TableMapping,
    args: Vec<FieldValue>,
}

impl<'m> QueryCompiler<'m> {
    pub fn new(mapping: &'m TableMapping) -> Self {
        Self {
            mapping,
            args: Vec::new(),
        }
    }

    /// Arguments collected so far, in placeholder order
    pub fn args(&self) -> &[FieldValue] {
        &self.args
    }

    pub fn into_args(self) -> Vec<FieldValue> {
        self.args
    }

    /// Compile one expression, appending its arguments
    pub fn compile(&mut self, expr: &Expr) -> Result<CompileResult> {
        match expr {
            Expr::Column(field) => {
                let column = self
                    .mapping
                    .find_column_with_field_name(field)
                    .or_else(|| self.mapping.find_column(field))
                    .ok_or_else(|| {
                        OrmError::translation(format!(
                            "{} has no mapped field {}",
                            self.mapping.table_name(),
                            field
                        ))
                    })?;
                Ok(CompileResult::text(format!("\"{}\"", column.name())))
            }
            Expr::Constant(value) | Expr::Captured(value) => {
                self.args.push(value.clone());
                Ok(CompileResult {
                    sql: "?".to_string(),
                    value: Some(value.clone()),
                })
            }
            Expr::List(values) => {
                self.args.extend(values.iter().cloned());
                let placeholders = vec!["?"; values.len()].join(",");
                Ok(CompileResult::text(format!("({placeholders})")))
            }
            Expr::Binary { op, left, right } => self.compile_binary(*op, left, right),
            Expr::Not(operand) => {
                let inner = self.compile(operand)?;
                let value = match inner.value {
                    Some(FieldValue::Bool(b)) => Some(FieldValue::Bool(!b)),
                    _ => None,
                };
                Ok(CompileResult {
                    sql: format!("NOT({})", inner.sql),
                    value,
                })
            }
            Expr::Call {
                method,
                target,
                args,
            } => {
                let operands: Vec<&Expr> = target.as_deref().into_iter().chain(args).collect();
                self.compile_call(method, &operands)
            }
            Expr::Convert { operand, to } => self.compile_convert(operand, to),
        }
    }

    fn compile_binary(&mut self, op: BinaryOp, left: &Expr, right: &Expr) -> Result<CompileResult> {
        let is_text_concat = op == BinaryOp::Add && self.is_text(left);
        let l = self.compile(left)?;
        let r = self.compile(right)?;

        if l.is_null_argument() || r.is_null_argument() {
            let keyword = match op {
                BinaryOp::Eq => "IS",
                BinaryOp::Ne => "IS NOT",
                other => {
                    return Err(OrmError::translation(format!(
                        "Cannot compare null with operator {}",
                        other.as_sql()
                    )))
                }
            };
            return Ok(CompileResult::text(format!("({} {} {})", l.sql, keyword, r.sql)));
        }

        let operator = if is_text_concat { "||" } else { op.as_sql() };
        Ok(CompileResult::text(format!("({} {} {})", l.sql, operator, r.sql)))
    }

    fn compile_call(&mut self, method: &Method, operands: &[&Expr]) -> Result<CompileResult> {
        let arity = match method {
            Method::ToLower | Method::ToUpper | Method::Trim | Method::Length | Method::Abs => 1,
            Method::Like
            | Method::Contains
            | Method::StartsWith
            | Method::EndsWith
            | Method::Equals => 2,
            Method::Replace => 3,
            Method::Other(name) => return Err(untranslatable(name)),
        };
        if operands.len() != arity {
            return Err(OrmError::translation(format!(
                "{method:?} expects {arity} operands, got {}",
                operands.len()
            )));
        }

        let sql = match method {
            Method::Contains => return self.compile_contains(operands[0], operands[1]),
            Method::Like => {
                let [a, b] = self.compile_all::<2>(operands)?;
                format!("({a} LIKE {b})")
            }
            Method::StartsWith => {
                let [a, b] = self.compile_all::<2>(operands)?;
                format!("({a} LIKE ({b} || '%'))")
            }
            Method::EndsWith => {
                let [a, b] = self.compile_all::<2>(operands)?;
                format!("({a} LIKE ('%' || {b}))")
            }
            Method::Equals => {
                let [a, b] = self.compile_all::<2>(operands)?;
                format!("({a} = ({b}))")
            }
            Method::ToLower => {
                let [a] = self.compile_all::<1>(operands)?;
                format!("(lower({a}))")
            }
            Method::ToUpper => {
                let [a] = self.compile_all::<1>(operands)?;
                format!("(upper({a}))")
            }
            Method::Trim => {
                let [a] = self.compile_all::<1>(operands)?;
                format!("(trim({a}))")
            }
            Method::Length => {
                let [a] = self.compile_all::<1>(operands)?;
                format!("(length({a}))")
            }
            Method::Abs => {
                let [a] = self.compile_all::<1>(operands)?;
                format!("(abs({a}))")
            }
            Method::Replace => {
                let [a, b, c] = self.compile_all::<3>(operands)?;
                format!("(replace({a}, {b}, {c}))")
            }
            Method::Other(name) => return Err(untranslatable(name)),
        };
        Ok(CompileResult::text(sql))
    }

    /// Compile exactly `N` operands left to right
    fn compile_all<const N: usize>(&mut self, operands: &[&Expr]) -> Result<[String; N]> {
        let mut out: [String; N] = std::array::from_fn(|_| String::new());
        for (slot, operand) in out.iter_mut().zip(operands) {
            *slot = self.compile(operand)?.sql;
        }
        Ok(out)
    }

    fn compile_contains(&mut self, container: &Expr, item: &Expr) -> Result<CompileResult> {
        if self.is_text(container) {
            let haystack = self.compile(container)?;
            let needle = self.compile(item)?;
            return Ok(CompileResult::text(format!(
                "({} LIKE ('%' || {} || '%'))",
                haystack.sql, needle.sql
            )));
        }
        if matches!(container, Expr::List(_)) {
            let needle = self.compile(item)?;
            let values = self.compile(container)?;
            return Ok(CompileResult::text(format!("({} IN {})", needle.sql, values.sql)));
        }
        Err(OrmError::translation(
            "Contains is only supported on text and on captured lists",
        ))
    }

    fn compile_convert(&mut self, operand: &Expr, to: &ColumnType) -> Result<CompileResult> {
        let inner = self.compile(operand)?;
        match inner.value {
            Some(value) if !value.is_null() => {
                let converted = value.convert_to(to)?;
                if inner.sql == "?" {
                    if let Some(last) = self.args.last_mut() {
                        *last = converted.clone();
                    }
                }
                Ok(CompileResult {
                    sql: inner.sql,
                    value: Some(converted),
                })
            }
            value => Ok(CompileResult {
                sql: inner.sql,
                value,
            }),
        }
    }

    fn is_text(&self, expr: &Expr) -> bool {
        self.static_type(expr).is_some_and(|t| t.is_text())
    }

    /// Semantic type of an expression when it can be known before execution
    fn static_type(&self, expr: &Expr) -> Option<ColumnType> {
        match expr {
            Expr::Column(field) => self
                .mapping
                .find_column_with_field_name(field)
                .or_else(|| self.mapping.find_column(field))
                .map(|c| c.column_type().clone()),
            Expr::Constant(v) | Expr::Captured(v) => v.column_type(),
            Expr::Convert { to, .. } => Some(to.clone()),
            Expr::Call { method, .. } => match method {
                Method::ToLower | Method::ToUpper | Method::Replace | Method::Trim => {
                    Some(ColumnType::Text)
                }
                Method::Length => Some(ColumnType::I64),
                _ => None,
            },
            Expr::Binary {
                op: BinaryOp::Add,
                left,
                ..
            } if self.is_text(left) => Some(ColumnType::Text),
            _ => None,
        }
    }
}

fn untranslatable(method: &str) -> OrmError {
    OrmError::translation(format!("Method {method} cannot be translated to SQL"))
}

/// Compile a predicate into SQL text and its arguments
pub fn compile_predicate(mapping: &TableMapping, expr: &Expr) -> Result<(String, Vec<FieldValue>)> {
    let mut compiler = QueryCompiler::new(mapping);
    let result = compiler.compile(expr)?;
    Ok((result.sql, compiler.into_args()))
}
