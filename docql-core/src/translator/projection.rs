//! Select translation.

use crate::ast::{ProjectedType, Projection, ProjectionMember};
use crate::error::{QueryError, QueryResult};
use crate::expr::{Expr, Lambda};

use super::predicate::Scope;
use super::{describe, is_parameter, Translator};

impl<'m> Translator<'m> {
    pub(crate) fn translate_projection(&self, selector: &Lambda, root_type: &str) -> QueryResult<Projection> {
        let scope = self.scope(selector, root_type)?;
        let body = selector.body.unwrap_convert();

        if is_parameter(body, &scope.parameter) {
            return Ok(Projection::Entity);
        }

        match body {
            Expr::Member { .. } => Ok(Projection::Field(self.projection_member(None, body, &scope)?)),
            Expr::New { type_name, members } => {
                let members = members
                    .iter()
                    .map(|(name, expr)| {
                        let name = (!name.is_empty()).then_some(name.as_str());
                        self.projection_member(name, expr, &scope)
                    })
                    .collect::<QueryResult<Vec<_>>>()?;
                Ok(Projection::Members(ProjectedType {
                    type_name: type_name.clone(),
                    members,
                }))
            }
            other => Err(QueryError::unsupported(format!(
                "cannot project {}",
                describe(other)
            ))),
        }
    }

    /// A projected member. A single-field projection is named after its last
    /// property; an unnamed DTO member keeps the dotted stored path.
    fn projection_member(
        &self,
        name: Option<&str>,
        expr: &Expr,
        scope: &Scope<'m>,
    ) -> QueryResult<ProjectionMember> {
        if is_parameter(expr, &scope.parameter) {
            return Err(QueryError::unsupported(
                "projecting the whole entity inside a new object is not supported",
            ));
        }
        let field = self.resolve_field(expr, scope)?;
        let name = match (name, expr.unwrap_convert()) {
            (Some(name), _) => Some(name.to_string()),
            (None, Expr::Member { target, name }) if is_parameter(target, &scope.parameter) => Some(name.clone()),
            (None, _) => None,
        };
        Ok(ProjectionMember {
            name,
            source: field.path,
            declared: field.declared,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::ast::Projection;
    use crate::error::QueryError;
    use crate::expr::{lambda, new_object, param, QueryExpr};
    use crate::metadata::*;
    use crate::translator::Translator;

    fn model() -> Model {
        Model::new()
            .with_type(
                TypeDescriptor::entity("Customer", "customers", "Id")
                    .with_property(PropertyDescriptor::new("Id", DeclaredType::string()))
                    .with_property(PropertyDescriptor::new("Name", DeclaredType::string()).stored_as("name"))
                    .with_property(PropertyDescriptor::new("Address", DeclaredType::complex("Address")).stored_as("address"))
                    .with_navigation(NavigationDescriptor::child_collection(
                        "Orders",
                        "Order",
                        CollectionKind::List,
                        "orders",
                    )),
            )
            .with_type(
                TypeDescriptor::complex("Address")
                    .with_property(PropertyDescriptor::new("City", DeclaredType::string()).stored_as("city")),
            )
            .with_type(
                TypeDescriptor::entity("Order", "orders", "Id")
                    .with_property(PropertyDescriptor::new("Id", DeclaredType::string())),
            )
    }

    fn select(body: crate::expr::Expr) -> Result<Projection, QueryError> {
        let model = model();
        let query = QueryExpr::from("Customer").select(lambda("c", body));
        Translator::new(&model).translate(&query).map(|n| n.projection)
    }

    #[test]
    fn test_identity_select_is_entity() {
        assert_eq!(select(param("c")).unwrap(), Projection::Entity);
    }

    #[test]
    fn test_single_field_and_nested_projection() {
        match select(param("c").member("Name")).unwrap() {
            Projection::Field(member) => {
                assert_eq!(member.result_name(), "Name");
                assert_eq!(member.source, "name");
            }
            other => panic!("unexpected {:?}", other),
        }

        match select(param("c").member("Address")).unwrap() {
            Projection::Field(member) => {
                assert_eq!(member.declared, DeclaredType::complex("Address"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_member_projection_names() {
        let body = new_object(
            "CustomerSummary",
            vec![
                ("Key", param("c").member("Id")),
                ("", param("c").member("Address").member("City")),
            ],
        );
        match select(body).unwrap() {
            Projection::Members(projected) => {
                assert_eq!(projected.type_name, "CustomerSummary");
                assert_eq!(projected.members[0].result_name(), "Key");
                assert_eq!(projected.members[0].source, "__name__");
                assert_eq!(projected.members[1].name, None);
                assert_eq!(projected.members[1].result_name(), "address.city");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_navigation_projection_rejected() {
        assert!(matches!(
            select(param("c").member("Orders")),
            Err(QueryError::UnsupportedQuery(_))
        ));
    }
}
