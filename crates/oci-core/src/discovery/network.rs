//! Network section extractors: VCNs (with nested children), DRGs, NSGs
//! (with rules), public IPs, load balancers (with nested children).

use serde_json::Value;

use crate::cli_invoke::build_array_query;
use crate::error::Result;

use super::{attach_children, collect_over_ids, ExtractorOutcome, OciCli};

async fn cli_list(cli: &dyn OciCli, args: Vec<String>) -> std::result::Result<Vec<Value>, crate::cli_invoke::CliError> {
    match cli.invoke(args).await? {
        Value::Array(items) => Ok(items),
        _ => Ok(Vec::new()),
    }
}

fn list_args(resource: &[&str], compartment_id: &str, fields: &[&str]) -> Vec<String> {
    let mut args: Vec<String> = resource.iter().map(|s| s.to_string()).collect();
    args.push("list".to_string());
    args.push("--compartment-id".to_string());
    args.push(compartment_id.to_string());
    args.extend(build_array_query(fields));
    args
}

/// VCNs nest `subnets`, `route-tables`, `security-lists`,
/// `internet-gateways`, `nat-gateways`, `service-gateways`, and
/// `drg-attachments` (§3.2).
pub async fn extract_vcns(cli: &dyn OciCli, compartment_ids: &[String]) -> Result<ExtractorOutcome> {
    let (mut vcns, list_exit, mut diagnostics) = collect_over_ids(compartment_ids, |compartment_id| {
        let args = list_args(
            &["network", "vcn"],
            &compartment_id,
            &["id", "display-name", "cidr-block", "compartment-id", "lifecycle-state"],
        );
        async move { cli_list(cli, args).await }
    })
    .await;

    let children: &[(&str, &[&str], &[&str])] = &[
        ("subnets", &["network", "subnet"], &["id", "display-name", "cidr-block", "lifecycle-state"]),
        ("route-tables", &["network", "route-table"], &["id", "display-name", "route-rules", "lifecycle-state"]),
        ("security-lists", &["network", "security-list"], &["id", "display-name", "ingress-security-rules", "egress-security-rules"]),
        ("internet-gateways", &["network", "internet-gateway"], &["id", "display-name", "is-enabled", "lifecycle-state"]),
        ("nat-gateways", &["network", "nat-gateway"], &["id", "display-name", "lifecycle-state"]),
        ("service-gateways", &["network", "service-gateway"], &["id", "display-name", "lifecycle-state"]),
        ("drg-attachments", &["network", "drg-attachment"], &["id", "display-name", "drg-id", "lifecycle-state"]),
    ];

    for (key, resource, fields) in children {
        let (exit, mut diag) = attach_children(&mut vcns, key, |vcn| {
            let vcn_id = vcn["id"].as_str().unwrap_or_default().to_string();
            let compartment_id = vcn["compartment-id"].as_str().unwrap_or_default().to_string();
            let mut args: Vec<String> = resource.iter().map(|s| s.to_string()).collect();
            args.push("list".to_string());
            args.push("--compartment-id".to_string());
            args.push(compartment_id);
            args.push("--vcn-id".to_string());
            args.push(vcn_id);
            args.extend(build_array_query(fields));
            async move { cli_list(cli, args).await }
        })
        .await;
        if exit != 0 {
            diagnostics.append(&mut diag);
        }
    }

    let exit_code = if list_exit != 0 || !diagnostics.is_empty() { 1 } else { 0 };
    Ok(ExtractorOutcome::from_array(vcns, exit_code, diagnostics))
}

pub async fn extract_drgs(cli: &dyn OciCli, compartment_ids: &[String]) -> Result<ExtractorOutcome> {
    let (items, exit_code, diagnostics) = collect_over_ids(compartment_ids, |compartment_id| {
        let args = list_args(&["network", "drg"], &compartment_id, &["id", "display-name", "lifecycle-state"]);
        async move { cli_list(cli, args).await }
    })
    .await;
    Ok(ExtractorOutcome::from_array(items, exit_code, diagnostics))
}

/// NSGs nest `rules`.
pub async fn extract_nsgs(cli: &dyn OciCli, compartment_ids: &[String]) -> Result<ExtractorOutcome> {
    let (mut nsgs, list_exit, mut diagnostics) = collect_over_ids(compartment_ids, |compartment_id| {
        let args = list_args(
            &["network", "nsg"],
            &compartment_id,
            &["id", "display-name", "vcn-id", "lifecycle-state"],
        );
        async move { cli_list(cli, args).await }
    })
    .await;

    let (exit, mut rule_diag) = attach_children(&mut nsgs, "rules", |nsg| {
        let nsg_id = nsg["id"].as_str().unwrap_or_default().to_string();
        let mut args = vec![
            "network".to_string(),
            "nsg".to_string(),
            "rules".to_string(),
            "list".to_string(),
            "--nsg-id".to_string(),
            nsg_id,
        ];
        args.extend(build_array_query(&["direction", "protocol", "is-valid", "description"]));
        async move { cli_list(cli, args).await }
    })
    .await;
    diagnostics.append(&mut rule_diag);

    let exit_code = if list_exit != 0 || exit != 0 { 1 } else { 0 };
    Ok(ExtractorOutcome::from_array(nsgs, exit_code, diagnostics))
}

/// Public IPs are scoped `REGION`, per compartment (§4.4).
pub async fn extract_public_ips(cli: &dyn OciCli, compartment_ids: &[String]) -> Result<ExtractorOutcome> {
    let (items, exit_code, diagnostics) = collect_over_ids(compartment_ids, |compartment_id| {
        let mut args = vec![
            "network".to_string(),
            "public-ip".to_string(),
            "list".to_string(),
            "--compartment-id".to_string(),
            compartment_id,
            "--scope".to_string(),
            "REGION".to_string(),
        ];
        args.extend(build_array_query(&["id", "ip-address", "lifetime", "assigned-entity-id", "lifecycle-state"]));
        async move { cli_list(cli, args).await }
    })
    .await;
    Ok(ExtractorOutcome::from_array(items, exit_code, diagnostics))
}

/// Load balancers nest `backend-sets`, `listeners`, `certificates`,
/// `hostnames`, `path-route-sets`, and `rule-sets` (§3.2).
pub async fn extract_load_balancers(cli: &dyn OciCli, compartment_ids: &[String]) -> Result<ExtractorOutcome> {
    let (mut lbs, list_exit, mut diagnostics) = collect_over_ids(compartment_ids, |compartment_id| {
        let args = list_args(
            &["lb", "load-balancer"],
            &compartment_id,
            &["id", "display-name", "ip-addresses", "shape-name", "lifecycle-state"],
        );
        async move { cli_list(cli, args).await }
    })
    .await;

    // Backend-sets, listeners, certificates, hostnames, path-route-sets,
    // and rule-sets are all nested directly under the load-balancer
    // response for the OCI CLI, not separately-listable resources; the
    // toolkit fetches each via a scoped `get` that returns a map keyed
    // by name, normalised here into an array.
    let children: &[(&str, &str)] = &[
        ("backend-sets", "backend-set"),
        ("listeners", "listener"),
        ("certificates", "certificate"),
        ("hostnames", "hostname"),
        ("path-route-sets", "path-route-set"),
        ("rule-sets", "rule-set"),
    ];

    for (key, subcommand) in children {
        let (exit, mut diag) = attach_children(&mut lbs, key, |lb| {
            let lb_id = lb["id"].as_str().unwrap_or_default().to_string();
            let mut args = vec![
                "lb".to_string(),
                subcommand.to_string(),
                "list".to_string(),
                "--load-balancer-id".to_string(),
                lb_id,
            ];
            args.extend(build_array_query(&["name"]));
            async move { cli_list(cli, args).await }
        })
        .await;
        if exit != 0 {
            diagnostics.append(&mut diag);
        }
    }

    let exit_code = if list_exit != 0 || !diagnostics.is_empty() { 1 } else { 0 };
    Ok(ExtractorOutcome::from_array(lbs, exit_code, diagnostics))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli_invoke::CliError;
    use serde_json::json;
    use std::sync::Mutex;

    struct ScriptedCli {
        script: Mutex<Vec<(&'static str, std::result::Result<Value, CliError>)>>,
    }

    #[async_trait::async_trait]
    impl OciCli for ScriptedCli {
        async fn invoke(&self, args: Vec<String>) -> std::result::Result<Value, CliError> {
            let joined = args.join(" ");
            let mut script = self.script.lock().unwrap();
            let idx = script
                .iter()
                .position(|(expect, _)| joined.contains(expect))
                .unwrap_or_else(|| panic!("unexpected args: {joined}"));
            script.remove(idx).1
        }
    }

    fn err() -> CliError {
        CliError { code: "Unknown".to_string(), message: None, status: 500 }
    }

    #[tokio::test]
    async fn vcn_extraction_nests_all_seven_child_kinds() {
        let script = vec![
            ("network vcn list", Ok(json!([{"id": "vcn1", "compartment-id": "c1"}]))),
            ("network subnet list", Ok(json!([{"id": "subnet1"}]))),
            ("network route-table list", Ok(json!([{"id": "rt1"}]))),
            ("network security-list list", Ok(json!([{"id": "sl1"}]))),
            ("network internet-gateway list", Ok(json!([{"id": "ig1"}]))),
            ("network nat-gateway list", Ok(json!([{"id": "nat1"}]))),
            ("network service-gateway list", Ok(json!([{"id": "sgw1"}]))),
            ("network drg-attachment list", Ok(json!([{"id": "drga1"}]))),
        ];
        let cli = ScriptedCli { script: Mutex::new(script) };

        let outcome = extract_vcns(&cli, &["c1".to_string()]).await.unwrap();
        assert_eq!(outcome.exit_code, 0);
        let vcn = &outcome.fragment[0];
        assert_eq!(vcn["subnets"], json!([{"id": "subnet1"}]));
        assert_eq!(vcn["route-tables"], json!([{"id": "rt1"}]));
        assert_eq!(vcn["security-lists"], json!([{"id": "sl1"}]));
        assert_eq!(vcn["internet-gateways"], json!([{"id": "ig1"}]));
        assert_eq!(vcn["nat-gateways"], json!([{"id": "nat1"}]));
        assert_eq!(vcn["service-gateways"], json!([{"id": "sgw1"}]));
        assert_eq!(vcn["drg-attachments"], json!([{"id": "drga1"}]));
    }

    #[tokio::test]
    async fn vcn_extraction_reports_failure_for_one_child_kind_as_empty_array() {
        let script = vec![
            ("network vcn list", Ok(json!([{"id": "vcn1", "compartment-id": "c1"}]))),
            ("network subnet list", Err(err())),
            ("network route-table list", Ok(json!([]))),
            ("network security-list list", Ok(json!([]))),
            ("network internet-gateway list", Ok(json!([]))),
            ("network nat-gateway list", Ok(json!([]))),
            ("network service-gateway list", Ok(json!([]))),
            ("network drg-attachment list", Ok(json!([]))),
        ];
        let cli = ScriptedCli { script: Mutex::new(script) };

        let outcome = extract_vcns(&cli, &["c1".to_string()]).await.unwrap();
        assert_eq!(outcome.exit_code, 1);
        assert_eq!(outcome.fragment[0]["subnets"], json!([]));
        assert!(outcome.message().contains("subnets"));
    }

    #[tokio::test]
    async fn nsg_extraction_attaches_rules() {
        let script = vec![
            ("network nsg list", Ok(json!([{"id": "nsg1"}]))),
            ("network nsg rules list", Ok(json!([{"direction": "INGRESS"}]))),
        ];
        let cli = ScriptedCli { script: Mutex::new(script) };

        let outcome = extract_nsgs(&cli, &["c1".to_string()]).await.unwrap();
        assert_eq!(outcome.exit_code, 0);
        assert_eq!(outcome.fragment[0]["rules"], json!([{"direction": "INGRESS"}]));
    }

    #[tokio::test]
    async fn public_ip_extraction_scopes_to_region() {
        struct CapturingCli(Mutex<Vec<String>>);
        #[async_trait::async_trait]
        impl OciCli for CapturingCli {
            async fn invoke(&self, args: Vec<String>) -> std::result::Result<Value, CliError> {
                self.0.lock().unwrap().push(args.join(" "));
                Ok(json!([]))
            }
        }

        let cli = CapturingCli(Mutex::new(Vec::new()));
        extract_public_ips(&cli, &["c1".to_string()]).await.unwrap();
        assert!(cli.0.lock().unwrap()[0].contains("--scope REGION"));
    }

    #[tokio::test]
    async fn load_balancer_extraction_nests_six_child_kinds() {
        let script = vec![
            ("lb load-balancer list", Ok(json!([{"id": "lb1"}]))),
            ("lb backend-set list", Ok(json!([{"name": "bs1"}]))),
            ("lb listener list", Ok(json!([{"name": "l1"}]))),
            ("lb certificate list", Ok(json!([{"name": "cert1"}]))),
            ("lb hostname list", Ok(json!([{"name": "h1"}]))),
            ("lb path-route-set list", Ok(json!([{"name": "prs1"}]))),
            ("lb rule-set list", Ok(json!([{"name": "rs1"}]))),
        ];
        let cli = ScriptedCli { script: Mutex::new(script) };

        let outcome = extract_load_balancers(&cli, &["c1".to_string()]).await.unwrap();
        assert_eq!(outcome.exit_code, 0);
        let lb = &outcome.fragment[0];
        assert_eq!(lb["backend-sets"], json!([{"name": "bs1"}]));
        assert_eq!(lb["listeners"], json!([{"name": "l1"}]));
        assert_eq!(lb["certificates"], json!([{"name": "cert1"}]));
        assert_eq!(lb["hostnames"], json!([{"name": "h1"}]));
        assert_eq!(lb["path-route-sets"], json!([{"name": "prs1"}]));
        assert_eq!(lb["rule-sets"], json!([{"name": "rs1"}]));
    }
}
