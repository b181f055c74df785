use prometheus_client::registry::Registry;

/// Encode the registry contents in the OpenMetrics text format.
pub fn format_prometheus_metrics(registry: &Registry) -> Result<String, std::fmt::Error> {
    let mut buffer = String::new();
    prometheus_client::encoding::text::encode(&mut buffer, registry)?;
    Ok(buffer)
}
