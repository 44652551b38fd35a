//! Object storage section extractor: buckets with nested
//! `lifecycle-policy` (object or `null`) and `replication-policies`
//! (array) (§3.2).

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

pub async fn extract_buckets(cli: &dyn OciCli, compartment_ids: &[String]) -> Result<ExtractorOutcome> {
    let (mut buckets, list_exit, mut diagnostics) = collect_over_ids(compartment_ids, |compartment_id| {
        let mut args = vec![
            "os".to_string(),
            "bucket".to_string(),
            "list".to_string(),
            "--compartment-id".to_string(),
            compartment_id,
        ];
        args.extend(build_array_query(&["name", "namespace", "compartment-id"]));
        async move { cli_list(cli, args).await }
    })
    .await;

    for bucket in buckets.iter_mut() {
        let name = bucket["name"].as_str().unwrap_or_default().to_string();
        let namespace = bucket["namespace"].as_str().unwrap_or_default().to_string();

        let mut lifecycle_args = vec![
            "os".to_string(),
            "object-lifecycle-policy".to_string(),
            "get".to_string(),
            "--bucket-name".to_string(),
            name.clone(),
            "--namespace-name".to_string(),
            namespace.clone(),
        ];
        lifecycle_args.push("--query".to_string());
        lifecycle_args.push("data".to_string());

        let lifecycle_policy = match cli.invoke(lifecycle_args).await {
            Ok(Value::Object(obj)) if !obj.is_empty() => Value::Object(obj),
            _ => Value::Null,
        };

        let mut replication_args = vec![
            "os".to_string(),
            "replication-policy".to_string(),
            "list".to_string(),
            "--bucket-name".to_string(),
            name,
            "--namespace-name".to_string(),
            namespace,
        ];
        replication_args.extend(build_array_query(&["id", "name", "destination-bucket-name", "status"]));

        let (replication_policies, failure) = match cli.invoke(replication_args).await {
            Ok(Value::Array(items)) => (items, None),
            Ok(_) => (Vec::new(), None),
            Err(e) => (Vec::new(), Some(e)),
        };

        if let Some(obj) = bucket.as_object_mut() {
            obj.insert("lifecycle-policy".to_string(), lifecycle_policy);
            obj.insert("replication-policies".to_string(), Value::Array(replication_policies));
        }

        if let Some(e) = failure {
            let bucket_name = bucket["name"].as_str().unwrap_or("<unknown>");
            diagnostics.push(format!("unable to list replication policies for {bucket_name}: {e}"));
        }
    }

    let exit_code = if list_exit != 0 || !diagnostics.is_empty() { 1 } else { 0 };
    Ok(ExtractorOutcome::from_array(buckets, exit_code, diagnostics))
}
