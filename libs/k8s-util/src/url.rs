/// Collapse namespace and object name path segments into placeholders so the
/// per-endpoint metric cardinality stays bounded.
pub(crate) fn template_path(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    // /api/{version}/... or /apis/{group}/{version}/...
    let rest_start = match segments.first() {
        Some(&"api") => 2,
        Some(&"apis") => 3,
        _ => return path.to_string(),
    };
    if segments.len() <= rest_start {
        return path.to_string();
    }

    let mut out: Vec<String> = segments[..rest_start].iter().map(|s| s.to_string()).collect();
    let mut rest = &segments[rest_start..];

    if rest.first() == Some(&"namespaces") {
        out.push("namespaces".to_string());
        if rest.len() > 1 {
            out.push("{namespace}".to_string());
        }
        rest = if rest.len() > 2 { &rest[2..] } else { &[] };
    }

    if let Some(resource) = rest.first() {
        out.push(resource.to_string());
        if rest.len() > 1 {
            out.push("{name}".to_string());
            for subresource in &rest[2..] {
                out.push(subresource.to_string());
            }
        }
    }

    format!("/{}", out.join("/"))
}
