//! Upstream predicate/projection trees.
//!
//! This is the structured form a calling query layer hands to the translator:
//! lambdas over a row parameter, member accesses, constants, captured
//! variables (bound later as named parameters) and a small set of method
//! calls. A `QueryExpr` strings query operators together over one root type.
//!
//! The builder helpers keep hand-written trees readable:
//!
//! ```rust
//! use docql_core::expr::{lambda, param, QueryExpr};
//!
//! let query = QueryExpr::from("Product")
//!     .filter(lambda("p", param("p").member("Category").equal_const("Electronics")))
//!     .order_by_descending(lambda("p", param("p").member("Price")))
//!     .skip_const(1)
//!     .take_const(2);
//! assert_eq!(query.ops.len(), 4);
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Binary operators of the upstream tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    AndAlso,
    OrElse,
}

/// Method calls the translator recognizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    Contains,
    Any,
    Equals,
    Where,
    OrderBy,
    OrderByDescending,
    ThenBy,
    ThenByDescending,
    Skip,
    Take,
    /// Anything else; always rejected, kept so hosts can forward the name
    Other(OtherMethod),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OtherMethod {
    StartsWith,
    EndsWith,
    ToUpper,
    ToLower,
    Count,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    /// Reference to a lambda parameter
    Param(String),
    Member {
        target: Box<Expr>,
        name: String,
    },
    Constant(Value),
    /// Captured runtime variable, resolved per execution
    Variable(String),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Not(Box<Expr>),
    /// Boxing / widening conversion inserted by generic code
    Convert(Box<Expr>),
    Call {
        method: Method,
        /// Receiver for instance calls, `None` for static calls
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<Box<Expr>>,
        #[serde(default)]
        args: Vec<Expr>,
    },
    Lambda(Box<Lambda>),
    /// Construction of an anonymous/DTO result type
    New {
        type_name: String,
        members: Vec<(String, Expr)>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lambda {
    pub parameter: String,
    pub body: Expr,
}

pub fn lambda(parameter: &str, body: Expr) -> Lambda {
    Lambda {
        parameter: parameter.to_string(),
        body,
    }
}

pub fn param(name: &str) -> Expr {
    Expr::Param(name.to_string())
}

pub fn constant(value: impl Into<Value>) -> Expr {
    Expr::Constant(value.into())
}

pub fn variable(name: &str) -> Expr {
    Expr::Variable(name.to_string())
}

pub fn not(expr: Expr) -> Expr {
    Expr::Not(Box::new(expr))
}

/// `Equals(left, right)` in its static, boxed form
pub fn boxed_equals(left: Expr, right: Expr) -> Expr {
    Expr::Call {
        method: Method::Equals,
        target: None,
        args: vec![Expr::Convert(Box::new(left)), Expr::Convert(Box::new(right))],
    }
}

pub fn new_object(type_name: &str, members: Vec<(&str, Expr)>) -> Expr {
    Expr::New {
        type_name: type_name.to_string(),
        members: members
            .into_iter()
            .map(|(n, e)| (n.to_string(), e))
            .collect(),
    }
}

impl Expr {
    pub fn member(self, name: &str) -> Expr {
        Expr::Member {
            target: Box::new(self),
            name: name.to_string(),
        }
    }

    fn binary(self, op: BinaryOp, right: Expr) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(self),
            right: Box::new(right),
        }
    }

    pub fn equal(self, right: Expr) -> Expr {
        self.binary(BinaryOp::Equal, right)
    }

    pub fn equal_const(self, value: impl Into<Value>) -> Expr {
        self.equal(constant(value))
    }

    pub fn not_equal(self, right: Expr) -> Expr {
        self.binary(BinaryOp::NotEqual, right)
    }

    pub fn less_than(self, right: Expr) -> Expr {
        self.binary(BinaryOp::LessThan, right)
    }

    pub fn less_or_equal(self, right: Expr) -> Expr {
        self.binary(BinaryOp::LessThanOrEqual, right)
    }

    pub fn greater_than(self, right: Expr) -> Expr {
        self.binary(BinaryOp::GreaterThan, right)
    }

    pub fn greater_or_equal(self, right: Expr) -> Expr {
        self.binary(BinaryOp::GreaterThanOrEqual, right)
    }

    pub fn and(self, right: Expr) -> Expr {
        self.binary(BinaryOp::AndAlso, right)
    }

    pub fn or(self, right: Expr) -> Expr {
        self.binary(BinaryOp::OrElse, right)
    }

    pub fn call(self, method: Method, args: Vec<Expr>) -> Expr {
        Expr::Call {
            method,
            target: Some(Box::new(self)),
            args,
        }
    }

    /// `self.Contains(item)`
    pub fn contains(self, item: Expr) -> Expr {
        self.call(Method::Contains, vec![item])
    }

    /// `self.Any(predicate)`
    pub fn any(self, predicate: Lambda) -> Expr {
        self.call(Method::Any, vec![Expr::Lambda(Box::new(predicate))])
    }

    /// `self.Equals(other)`
    pub fn equals(self, other: Expr) -> Expr {
        self.call(Method::Equals, vec![other])
    }

    pub fn where_(self, predicate: Lambda) -> Expr {
        self.call(Method::Where, vec![Expr::Lambda(Box::new(predicate))])
    }

    pub fn order_by(self, key: Lambda) -> Expr {
        self.call(Method::OrderBy, vec![Expr::Lambda(Box::new(key))])
    }

    pub fn order_by_descending(self, key: Lambda) -> Expr {
        self.call(Method::OrderByDescending, vec![Expr::Lambda(Box::new(key))])
    }

    pub fn then_by(self, key: Lambda) -> Expr {
        self.call(Method::ThenBy, vec![Expr::Lambda(Box::new(key))])
    }

    pub fn skip(self, count: Expr) -> Expr {
        self.call(Method::Skip, vec![count])
    }

    pub fn take(self, count: Expr) -> Expr {
        self.call(Method::Take, vec![count])
    }

    /// Strip boxing conversions
    pub fn unwrap_convert(&self) -> &Expr {
        let mut current = self;
        while let Expr::Convert(inner) = current {
            current = inner;
        }
        current
    }
}

/// Terminal reductions and element operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementOp {
    First,
    Single,
    Last,
}

/// One operator of a query pipeline, applied in order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryOp {
    Where(Lambda),
    OrderBy {
        key: Lambda,
        #[serde(default)]
        descending: bool,
    },
    ThenBy {
        key: Lambda,
        #[serde(default)]
        descending: bool,
    },
    Skip(Expr),
    Take(Expr),
    TakeLast(Expr),
    Select(Lambda),
    Include(Lambda),
    /// Continues the most recent `Include`/`ThenInclude` chain
    ThenInclude(Lambda),
    Count(Option<Lambda>),
    Any(Option<Lambda>),
    Sum(Lambda),
    Average(Lambda),
    Min(Lambda),
    Max(Lambda),
    Element {
        op: ElementOp,
        #[serde(default)]
        or_default: bool,
        #[serde(default)]
        predicate: Option<Lambda>,
    },
}

/// A query pipeline rooted at one entity type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryExpr {
    pub root: String,
    #[serde(default)]
    pub ops: Vec<QueryOp>,
}

impl QueryExpr {
    pub fn from(root: &str) -> Self {
        Self {
            root: root.to_string(),
            ops: Vec::new(),
        }
    }

    fn push(mut self, op: QueryOp) -> Self {
        self.ops.push(op);
        self
    }

    pub fn filter(self, predicate: Lambda) -> Self {
        self.push(QueryOp::Where(predicate))
    }

    pub fn order_by(self, key: Lambda) -> Self {
        self.push(QueryOp::OrderBy {
            key,
            descending: false,
        })
    }

    pub fn order_by_descending(self, key: Lambda) -> Self {
        self.push(QueryOp::OrderBy {
            key,
            descending: true,
        })
    }

    pub fn then_by(self, key: Lambda) -> Self {
        self.push(QueryOp::ThenBy {
            key,
            descending: false,
        })
    }

    pub fn then_by_descending(self, key: Lambda) -> Self {
        self.push(QueryOp::ThenBy {
            key,
            descending: true,
        })
    }

    pub fn skip(self, count: Expr) -> Self {
        self.push(QueryOp::Skip(count))
    }

    pub fn skip_const(self, count: u64) -> Self {
        self.skip(constant(count))
    }

    pub fn take(self, count: Expr) -> Self {
        self.push(QueryOp::Take(count))
    }

    pub fn take_const(self, count: u64) -> Self {
        self.take(constant(count))
    }

    pub fn take_last(self, count: Expr) -> Self {
        self.push(QueryOp::TakeLast(count))
    }

    pub fn select(self, selector: Lambda) -> Self {
        self.push(QueryOp::Select(selector))
    }

    pub fn include(self, navigation: Lambda) -> Self {
        self.push(QueryOp::Include(navigation))
    }

    pub fn then_include(self, navigation: Lambda) -> Self {
        self.push(QueryOp::ThenInclude(navigation))
    }

    pub fn count(self) -> Self {
        self.push(QueryOp::Count(None))
    }

    pub fn any(self) -> Self {
        self.push(QueryOp::Any(None))
    }

    pub fn sum(self, selector: Lambda) -> Self {
        self.push(QueryOp::Sum(selector))
    }

    pub fn average(self, selector: Lambda) -> Self {
        self.push(QueryOp::Average(selector))
    }

    pub fn min(self, selector: Lambda) -> Self {
        self.push(QueryOp::Min(selector))
    }

    pub fn max(self, selector: Lambda) -> Self {
        self.push(QueryOp::Max(selector))
    }

    pub fn first(self) -> Self {
        self.element(ElementOp::First, false)
    }

    pub fn first_or_default(self) -> Self {
        self.element(ElementOp::First, true)
    }

    pub fn single(self) -> Self {
        self.element(ElementOp::Single, false)
    }

    pub fn single_or_default(self) -> Self {
        self.element(ElementOp::Single, true)
    }

    pub fn last(self) -> Self {
        self.element(ElementOp::Last, false)
    }

    fn element(self, op: ElementOp, or_default: bool) -> Self {
        self.push(QueryOp::Element {
            op,
            or_default,
            predicate: None,
        })
    }
}
