//! Certificates section extractor: a flat per-compartment list of SSL
//! certificates managed by the OCI Certificates service.

use serde_json::Value;

use crate::cli_invoke::build_array_query;
use crate::error::Result;

use super::{collect_over_ids, ExtractorOutcome, OciCli};

async fn cli_list(cli: &dyn OciCli, args: Vec<String>) -> std::result::Result<Vec<Value>, crate::cli_invoke::CliError> {
    match cli.invoke(args).await? {
        Value::Array(items) => Ok(items),
        _ => Ok(Vec::new()),
    }
}

pub async fn extract_certificates(cli: &dyn OciCli, compartment_ids: &[String]) -> Result<ExtractorOutcome> {
    let (items, exit_code, diagnostics) = collect_over_ids(compartment_ids, |compartment_id| {
        let mut args = vec![
            "certs-mgmt".to_string(),
            "certificate".to_string(),
            "list".to_string(),
            "--compartment-id".to_string(),
            compartment_id,
        ];
        args.extend(build_array_query(&[
            "id",
            "name",
            "certificate-rules",
            "lifecycle-state",
            "current-version-summary",
        ]));
        async move { cli_list(cli, args).await }
    })
    .await;
    Ok(ExtractorOutcome::from_array(items, exit_code, diagnostics))
}
