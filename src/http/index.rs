//! Generated index page listing read-only endpoints.

use std::fmt::Write;

use axum::http::Method;

use crate::routing::router::{Handler, RouteTable};
use crate::rpc::descriptor::{MethodEntry, MethodKind, ServiceCatalog};

/// Render the index page: one section per service, one link per query method.
///
/// `address` is the host (and port) used in links; links are scheme-relative.
pub fn render(catalog: &ServiceCatalog, routes: &RouteTable<Handler>, address: &str) -> String {
    let mut html = String::from("<html><body>");

    for service in catalog.services() {
        let _ = write!(html, "<br>{} endpoints:<br>", escape(&service.full_name));

        for entry in service.methods.iter().filter(|m| m.kind == MethodKind::Query) {
            match link_path(entry, routes) {
                Some(path) => {
                    let link = format!("//{address}{}{path}", routes.prefix());
                    let link = escape(&link);
                    let _ = write!(html, "<a href=\"{link}\">{link}</a><br>");
                }
                None => tracing::debug!(
                    method = %entry.qualified_name(),
                    "No capture-free GET route; left off the index page"
                ),
            }
        }
    }

    html.push_str("</body></html>");
    html
}

/// Path of the first GET route for `entry` that needs no captured values.
fn link_path(entry: &MethodEntry, routes: &RouteTable<Handler>) -> Option<String> {
    let name = entry.qualified_name();
    routes
        .routes()
        .iter()
        .filter(|r| r.verb == Method::GET && r.method_name == name)
        .find_map(|r| r.pattern.literal_path())
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::RouteConfig;
    use crate::rpc::fixtures;

    fn catalog() -> ServiceCatalog {
        ServiceCatalog::from_pool(fixtures::pool(), &[], &["Get".to_string()]).unwrap()
    }

    #[test]
    fn test_two_services_two_links() {
        let catalog = catalog();
        let routes = RouteTable::from_catalog(&catalog, &[], "").unwrap();
        let html = render(&catalog, &routes, "localhost:8080");

        assert_eq!(html.matches("<a href=").count(), 2);
        assert!(html.contains("<br>gallactic.v1.BlockChain endpoints:<br>"));
        assert!(html.contains("<br>gallactic.v1.Network endpoints:<br>"));
        assert!(html.contains(r#"<a href="//localhost:8080/Account">//localhost:8080/Account</a>"#));
        assert!(html.contains(r#"href="//localhost:8080/NetworkInfo""#));
        assert!(!html.contains("Search"));
        assert!(!html.contains("Subscribe"));
    }

    #[test]
    fn test_capture_routes_are_skipped() {
        let catalog = catalog();
        let rules = [RouteConfig {
            method: "gallactic.v1.BlockChain/GetAccount".to_string(),
            verb: "GET".to_string(),
            path: "/accounts/{address}".to_string(),
            body: None,
        }];
        let routes = RouteTable::from_catalog(&catalog, &rules, "/api").unwrap();
        let html = render(&catalog, &routes, "gw");

        assert_eq!(html.matches("<a href=").count(), 1);
        assert!(html.contains(r#"href="//gw/api/NetworkInfo""#));
    }

    #[test]
    fn test_escape() {
        assert_eq!(escape(r#"<a href="x">&"#), "&lt;a href=&quot;x&quot;&gt;&amp;");
    }
}
