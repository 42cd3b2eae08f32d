use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::{
    core::context::RequestContext,
    ports::expression::{ExpressionResolver, ResolveError, ResolveResult},
};

/// `{#root.field}` or `{#root.field['key']}`
static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{#\s*([A-Za-z_][A-Za-z0-9_.]*)\s*(?:\[\s*'([^']*)'\s*\])?\s*\}")
        .expect("valid regex")
});

/// Resolver returning the configured text unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct LiteralResolver;

impl ExpressionResolver for LiteralResolver {
    fn resolve(&self, template: &str, _context: &RequestContext) -> ResolveResult<String> {
        Ok(template.to_string())
    }
}

/// Resolver substituting `{#...}` placeholders with request data
///
/// Supported expressions:
/// * `{#request.method}`, `{#request.path}`, `{#request.query}`
/// * `{#request.headers['name']}`
/// * `{#context.attributes['name']}`
///
/// Missing headers, attributes or query strings resolve to an empty string.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaceholderResolver;

impl PlaceholderResolver {
    fn lookup(&self, captures: &Captures<'_>, context: &RequestContext) -> ResolveResult<String> {
        let path = &captures[1];
        let key = captures.get(2).map(|key| key.as_str());

        let value = match (path, key) {
            ("request.method", None) => Some(context.method.as_str()),
            ("request.path", None) => Some(context.path.as_str()),
            ("request.query", None) => context.query.as_deref(),
            ("request.headers", Some(name)) => context.header(name),
            ("context.attributes", Some(name)) => context.attribute(name),
            ("request.headers" | "context.attributes", None) => {
                return Err(ResolveError::InvalidExpression {
                    expression: captures[0].to_string(),
                    message: "a key is required, e.g. ['name']".to_string(),
                });
            }
            _ => return Err(ResolveError::UnknownExpression(captures[0].to_string())),
        };
        Ok(value.unwrap_or_default().to_string())
    }
}

impl ExpressionResolver for PlaceholderResolver {
    fn resolve(&self, template: &str, context: &RequestContext) -> ResolveResult<String> {
        if !template.contains("{#") {
            return Ok(template.to_string());
        }

        let mut resolved = String::with_capacity(template.len());
        let mut last = 0;
        for captures in PLACEHOLDER.captures_iter(template) {
            let Some(whole) = captures.get(0) else {
                continue;
            };
            resolved.push_str(&template[last..whole.start()]);
            resolved.push_str(&self.lookup(&captures, context)?);
            last = whole.end();
        }
        resolved.push_str(&template[last..]);
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use http::{HeaderValue, Method};

    use super::*;

    fn context() -> RequestContext {
        let mut context = RequestContext {
            method: Method::PUT,
            path: "/orders/7".to_string(),
            query: Some("v=2".to_string()),
            ..RequestContext::default()
        }
        .with_attribute("tenant", "acme");
        context
            .headers
            .insert("x-region", HeaderValue::from_static("eu"));
        context
    }

    #[test]
    fn test_literal_resolver() {
        let text = "{#request.method}";
        assert_eq!(LiteralResolver.resolve(text, &context()).unwrap(), text);
    }

    #[test]
    fn test_placeholders() {
        let resolved = PlaceholderResolver
            .resolve(
                "{#request.method} {#request.path}?{#request.query} {#request.headers['X-Region']} {#context.attributes['tenant']}",
                &context(),
            )
            .unwrap();
        assert_eq!(resolved, "PUT /orders/7?v=2 eu acme");
    }

    #[test]
    fn test_missing_values_are_empty() {
        let resolved = PlaceholderResolver
            .resolve(
                "[{#request.headers['absent']}][{#context.attributes['absent']}]",
                &RequestContext::default(),
            )
            .unwrap();
        assert_eq!(resolved, "[][]");
    }

    #[test]
    fn test_unknown_expression() {
        assert_eq!(
            PlaceholderResolver.resolve("{#response.status}", &context()),
            Err(ResolveError::UnknownExpression("{#response.status}".to_string()))
        );
        assert!(matches!(
            PlaceholderResolver.resolve("{#request.headers}", &context()),
            Err(ResolveError::InvalidExpression { .. })
        ));
    }

    #[test]
    fn test_stylesheet_braces_are_untouched() {
        let text = r#"<a href="{@href}"><xsl:value-of select="x"/></a>"#;
        assert_eq!(PlaceholderResolver.resolve(text, &context()).unwrap(), text);
    }
}
