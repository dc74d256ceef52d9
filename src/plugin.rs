//! CNI command dispatch
//!
//! Turns one invocation (variable lookup plus stdin) into the single JSON
//! document the runtime reads from stdout and the process exit status.

use std::io::Read;
use tracing::{debug, error, info};

use crate::cni::{parse_extra_args, CniCommand, CniInvocation, ErrorResult, NetConf, VersionResult};
use crate::config::cli::CliArgs;
use crate::config::{load_config, PluginConfig};
use crate::error::AppError;
use crate::ipam::file::is_missing;
use crate::network::{LinkConnector, NamespaceSwitcher};
use crate::provisioner::InterfaceProvisioner;

/// Handle one CNI invocation and return the result document
///
/// `setup` runs once the configuration is known and builds the provisioner;
/// VERSION answers before stdin is read or `setup` is called.
pub async fn run<F, R, B, N, C>(
    cli: &CliArgs,
    lookup: F,
    mut stdin: R,
    setup: B,
) -> Result<String, AppError>
where
    F: Fn(&str) -> Option<String>,
    R: Read,
    B: FnOnce(&PluginConfig) -> Result<InterfaceProvisioner<N, C>, AppError>,
    N: NamespaceSwitcher,
    C: LinkConnector,
{
    let (command, request) = match CniInvocation::from_lookup(lookup)? {
        CniInvocation::Version => return Ok(serde_json::to_string(&VersionResult::default())?),
        CniInvocation::Add(request) => (CniCommand::Add, request),
        CniInvocation::Del(request) => (CniCommand::Del, request),
    };

    let mut input = String::new();
    stdin.read_to_string(&mut input)?;
    let netconf = NetConf::parse(&input)?;
    let config = load_config(cli, &netconf)?;
    let provisioner = setup(&config)?;

    info!(
        %command,
        container_id = %request.container_id,
        netns = %request.netns.display(),
        ifname = %request.ifname,
        "handling CNI command"
    );
    if let Some(ref args) = request.extra_args {
        debug!(args = ?parse_extra_args(args), "ignoring CNI_ARGS");
    }

    let result = if command == CniCommand::Del {
        provisioner.del(&request).await?
    } else {
        provisioner.add(&request).await?
    };

    Ok(serde_json::to_string(&result.finalize(&config.dns))?)
}

/// Document for stdout and the process exit status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub document: String,
    pub exit_code: u8,
}

impl Response {
    pub fn from_result(result: Result<String, AppError>) -> Self {
        match result {
            Ok(document) => Self {
                document,
                exit_code: 0,
            },
            Err(err) => Self {
                document: error_document(&err),
                exit_code: 1,
            },
        }
    }
}

fn error_document(err: &AppError) -> String {
    error!(code = err.code(), error = %err, "CNI command failed");
    if let AppError::Ipam(ipam) = err.root() {
        if is_missing(ipam) {
            error!("address pool file is missing; create it with --init-pool <CIDR>");
        }
    }

    let payload = ErrorResult::from(err);
    serde_json::to_string(&payload).unwrap_or_else(|e| {
        error!(error = %e, "failed to encode error result");
        format!(
            "{{\"cniVersion\":\"{}\",\"code\":{}}}",
            payload.cni_version, payload.code
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipam::MemoryPool;
    use crate::network::fake::FakeKernel;
    use crate::network::BridgeManager;
    use serde_json::Value;
    use std::collections::HashMap;
    use std::io;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    const NETNS: &str = "/var/run/netns/dispatch";

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    fn add_vars() -> Vec<(&'static str, &'static str)> {
        vec![
            ("CNI_COMMAND", "ADD"),
            ("CNI_CONTAINERID", "abcdef0123456789"),
            ("CNI_NETNS", NETNS),
            ("CNI_IFNAME", "eth0"),
        ]
    }

    fn fake_setup(
        kernel: FakeKernel,
    ) -> impl FnOnce(&PluginConfig) -> Result<InterfaceProvisioner<FakeKernel, FakeKernel>, AppError>
    {
        move |config| {
            Ok(InterfaceProvisioner::new(
                Arc::new(kernel.clone()),
                Arc::new(kernel),
                Arc::new(MemoryPool::new("10.244.1.0/24".parse().unwrap())),
                BridgeManager::new(config.bridge_name.clone()),
            ))
        }
    }

    fn unused_setup(
        called: &AtomicBool,
    ) -> impl FnOnce(&PluginConfig) -> Result<InterfaceProvisioner<FakeKernel, FakeKernel>, AppError> + '_
    {
        move |_| {
            called.store(true, Ordering::SeqCst);
            Err(AppError::Io(io::Error::other("setup must not run")))
        }
    }

    fn parse(document: &str) -> Value {
        serde_json::from_str(document).unwrap()
    }

    #[tokio::test]
    async fn test_version_skips_stdin_and_setup() {
        let called = AtomicBool::new(false);
        let result = run(
            &CliArgs::default(),
            lookup(&[("CNI_COMMAND", "VERSION")]),
            io::empty(),
            unused_setup(&called),
        )
        .await;

        let response = Response::from_result(result);
        assert_eq!(response.exit_code, 0);
        assert!(!called.load(Ordering::SeqCst));

        let doc = parse(&response.document);
        assert_eq!(doc["cniVersion"], "0.3.1");
        assert!(doc["supportedVersions"]
            .as_array()
            .unwrap()
            .contains(&Value::from("0.3.0")));
    }

    #[tokio::test]
    async fn test_missing_variable_reports_error_document() {
        let called = AtomicBool::new(false);
        let result = run(
            &CliArgs::default(),
            lookup(&[("CNI_COMMAND", "ADD"), ("CNI_CONTAINERID", "abc")]),
            io::empty(),
            unused_setup(&called),
        )
        .await;

        let response = Response::from_result(result);
        assert_eq!(response.exit_code, 1);
        assert!(!called.load(Ordering::SeqCst));

        let doc = parse(&response.document);
        assert_eq!(doc["code"], 4);
        assert_eq!(doc["msg"], "Invocation error: Missing CNI_NETNS argument");
    }

    #[tokio::test]
    async fn test_undecodable_stdin_reports_decode_code() {
        let called = AtomicBool::new(false);
        let result = run(
            &CliArgs::default(),
            lookup(&add_vars()),
            "{not json".as_bytes(),
            unused_setup(&called),
        )
        .await;

        let response = Response::from_result(result);
        assert_eq!(response.exit_code, 1);
        assert!(!called.load(Ordering::SeqCst));
        assert_eq!(parse(&response.document)["code"], 6);
    }

    #[tokio::test]
    async fn test_add_prints_success_document() {
        let kernel = FakeKernel::new();
        kernel.add_namespace(NETNS);

        let result = run(
            &CliArgs::default(),
            lookup(&add_vars()),
            io::empty(),
            fake_setup(kernel),
        )
        .await;

        let response = Response::from_result(result);
        assert_eq!(response.exit_code, 0);

        let doc = parse(&response.document);
        assert_eq!(doc["cniVersion"], "0.3.1");
        assert_eq!(doc["ips"][0]["address"], "10.244.1.2/24");
        assert_eq!(doc["ips"][0]["gateway"], "10.244.1.1");
        assert_eq!(doc["dns"]["nameservers"][0], "10.96.0.10");
    }
}
