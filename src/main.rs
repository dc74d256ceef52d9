use clap::Parser;
use std::env;
use std::io;
use std::process::ExitCode;
use std::sync::Arc;

use veth_bridge_cni::cni::NetConf;
use veth_bridge_cni::config::cli::{print_default_config, CliArgs};
use veth_bridge_cni::config::load_config;
use veth_bridge_cni::error::AppError;
use veth_bridge_cni::ipam::FilePool;
use veth_bridge_cni::network::{BridgeManager, KernelNamespaces, RtNetlinkConnector};
use veth_bridge_cni::plugin::{self, Response};
use veth_bridge_cni::{logging, InterfaceProvisioner};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = CliArgs::parse();

    if cli.print_default_config {
        print_default_config();
        return ExitCode::SUCCESS;
    }

    if cli.is_operator_command() {
        return match operate(&cli) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("{}", e);
                ExitCode::FAILURE
            }
        };
    }

    let result = plugin::run(&cli, |key| env::var(key).ok(), io::stdin(), |config| {
        logging::init(config)?;
        Ok(InterfaceProvisioner::new(
            Arc::new(KernelNamespaces),
            Arc::new(RtNetlinkConnector),
            Arc::new(FilePool::new(config.pool_file.clone())),
            BridgeManager::new(config.bridge_name.clone()),
        ))
    })
    .await;

    let response = Response::from_result(result);
    println!("{}", response.document);
    ExitCode::from(response.exit_code)
}

/// Handle `--init-pool` and `--validate-config`
fn operate(cli: &CliArgs) -> Result<(), AppError> {
    let config = load_config(cli, &NetConf::default())?;

    if let Some(cidr) = cli.init_pool {
        logging::init(&config)?;
        let pool = FilePool::initialize(config.pool_file.clone(), cidr)?;
        println!("Created address pool {} for {}", pool.path().display(), cidr);
        return Ok(());
    }

    println!("Configuration is valid");
    println!("  bridge: {}", config.bridge_name);
    println!("  pool file: {}", config.pool_file.display());
    println!("  log level: {} ({})", config.log_level, config.log_format);
    Ok(())
}
