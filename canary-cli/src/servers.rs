//! Registry management commands

use crate::ServersCommands;
use crate::error::CliError;
use canary_registry::{RegistrySource, RegistryStore, ServerDefinition, ServerSpec, Transport};
use std::path::Path;

pub fn run_servers_command(command: ServersCommands, servers_file: &Path) -> Result<(), CliError> {
    let store = RegistryStore::new(servers_file)?;

    match command {
        ServersCommands::List => {
            let definitions = store.list()?;
            if store.source() == RegistrySource::Bundled {
                println!(
                    "(no registry at {}, showing bundled defaults)",
                    servers_file.display()
                );
            }
            if definitions.is_empty() {
                println!("No servers registered.");
            }
            for definition in &definitions {
                println!("{}", describe(definition));
            }
            Ok(())
        }
        ServersCommands::Add {
            id,
            command,
            args,
            env,
            base_url,
            sse_path,
        } => {
            let spec = build_spec(command, args, env, base_url, sse_path)?;
            let definition = store.upsert(&id, spec)?;
            println!("✅ Saved {}", describe(&definition));
            Ok(())
        }
        ServersCommands::Remove { id } => {
            if store.delete(&id)? {
                println!("🗑️  Removed {id}");
            } else {
                println!("No server named {id}");
            }
            Ok(())
        }
    }
}

fn build_spec(
    command: Option<String>,
    args: Vec<String>,
    env: Vec<String>,
    base_url: Option<String>,
    sse_path: Option<String>,
) -> Result<ServerSpec, CliError> {
    match (command, base_url) {
        (Some(command), None) => {
            let mut spec = ServerSpec::process(command, args);
            for pair in env {
                let (key, value) = parse_env_pair(&pair)?;
                spec = spec.with_env(key, value);
            }
            Ok(spec)
        }
        (None, Some(base_url)) => {
            if !args.is_empty() || !env.is_empty() {
                return Err(CliError::InvalidArgument(
                    "--arg and --env only apply to --command servers".to_string(),
                ));
            }
            Ok(ServerSpec::network(base_url, sse_path))
        }
        _ => Err(CliError::InvalidArgument(
            "exactly one of --command or --base-url is required".to_string(),
        )),
    }
}

fn parse_env_pair(pair: &str) -> Result<(&str, &str), CliError> {
    match pair.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key, value)),
        _ => Err(CliError::InvalidArgument(format!(
            "expected KEY=VALUE, got '{pair}'"
        ))),
    }
}

fn describe(definition: &ServerDefinition) -> String {
    match definition.transport() {
        Transport::Process { command, args, .. } if args.is_empty() => {
            format!("{}  process  {command}", definition.id)
        }
        Transport::Process { command, args, .. } => {
            format!("{}  process  {command} {}", definition.id, args.join(" "))
        }
        network @ Transport::Network { .. } => format!(
            "{}  network  {}",
            definition.id,
            network.endpoint().unwrap_or_default()
        ),
    }
}
