use std::path::{Path, PathBuf};
use std::str::FromStr;

use alloy_primitives::{Address, U256, hex};
use anyhow::{Context, Result, anyhow, bail};
use clap::{Arg, ArgAction, ArgMatches, Command};
use clipflow_api::JsonRpcClient;
use clipflow_engine::{Clipboard, EncoderKind, PasteParams, Workflow, parse_plan_file};
use clipflow_types::{ClientConfig, RunData, RunMode};
use clipflow_util::{expand_tilde, load_config, load_config_from_path};
use serde_json::json;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let matches = build_cli().get_matches();
    let config = resolve_config(matches.get_one::<String>("config").map(String::as_str))?;

    match matches.subcommand() {
        Some(("clipboard", sub)) => println!("{}", run_clipboard_cmd(sub)?),
        Some(("plan", sub)) => println!("{}", run_plan_cmd(&config, sub).await?),
        _ => bail!("expected a subcommand; try --help"),
    }
    Ok(())
}

fn init_tracing() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .try_init();
}

fn build_cli() -> Command {
    let value_arg = Arg::new("value")
        .long("value")
        .action(ArgAction::Set)
        .help("Native value forwarded with the call (decimal or 0x hex)");
    let file_arg = Arg::new("file")
        .long("file")
        .short('f')
        .required(true)
        .action(ArgAction::Set)
        .help("Path to plan YAML/JSON");
    let amount_arg = Arg::new("amount")
        .long("amount")
        .action(ArgAction::Set)
        .default_value("0")
        .help("Initial running amount");

    let clipboard = Command::new("clipboard")
        .about("Encode and inspect paste instructions")
        .subcommand_required(true)
        .subcommand(
            Command::new("encode")
                .about("Encode instructions given as JSON: [], [a,b,c] or [[a,b,c],...]")
                .arg(Arg::new("instructions").long("instructions").short('i').required(true).action(ArgAction::Set))
                .arg(value_arg.clone()),
        )
        .subcommand(
            Command::new("slot")
                .about("Encode one instruction addressed by word indices")
                .arg(Arg::new("source").required(true).help("Index of the source call"))
                .arg(Arg::new("copy").required(true).help("Word index into the source call's return data"))
                .arg(Arg::new("paste").required(true).help("Word index into this call's arguments"))
                .arg(value_arg),
        )
        .subcommand(
            Command::new("decode")
                .about("Decode an encoded clipboard")
                .arg(Arg::new("hex").required(true)),
        );

    let plan = Command::new("plan")
        .about("Build plan documents")
        .subcommand_required(true)
        .subcommand(
            Command::new("preview")
                .about("Build a plan offline and print its steps, tags and calldata")
                .arg(file_arg.clone())
                .arg(amount_arg.clone())
                .arg(
                    Arg::new("mode")
                        .long("mode")
                        .action(ArgAction::Set)
                        .default_value("execute")
                        .help("forward, reversed, execute, read_only_call or estimate_cost"),
                ),
        )
        .subcommand(
            Command::new("simulate")
                .about("Build a plan and simulate it through the configured RPC endpoint")
                .arg(file_arg)
                .arg(amount_arg)
                .arg(Arg::new("from").long("from").action(ArgAction::Set).help("Sender address for the simulation")),
        );

    Command::new("clipflow")
        .about("Compose multi-step calls with cross-call paste instructions")
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .action(ArgAction::Set)
                .help("Path to config JSON (defaults to CLIPFLOW_CONFIG_PATH or the user config dir)"),
        )
        .subcommand(clipboard)
        .subcommand(plan)
}

fn resolve_config(path: Option<&str>) -> Result<ClientConfig> {
    let config = match path {
        Some(path) => load_config_from_path(&expand_tilde(path))?,
        None => load_config()?,
    };
    debug!(chain_id = config.network.chain_id, rpc_url = %config.network.rpc_url, "loaded config");
    Ok(config)
}

fn parse_u256(label: &str, raw: &str) -> Result<U256> {
    U256::from_str(raw.trim()).map_err(|e| anyhow!("invalid {label} '{raw}': {e}"))
}

fn parse_value(m: &ArgMatches) -> Result<U256> {
    m.get_one::<String>("value")
        .map(|raw| parse_u256("value", raw))
        .transpose()
        .map(Option::unwrap_or_default)
}

fn run_clipboard_cmd(m: &ArgMatches) -> Result<String> {
    match m.subcommand() {
        Some(("encode", sub)) => {
            let raw = sub.get_one::<String>("instructions").context("missing --instructions")?;
            let instructions: serde_json::Value = serde_json::from_str(raw).context("instructions must be JSON")?;
            let encoded = Clipboard::encode(PasteParams::from_json(&instructions)?, parse_value(sub)?)?;
            Ok(encoded.to_string())
        }
        Some(("slot", sub)) => {
            let index = |name: &str| -> Result<u128> {
                let raw = sub.get_one::<String>(name).with_context(|| format!("missing {name}"))?;
                raw.parse().with_context(|| format!("invalid {name} '{raw}'"))
            };
            let encoded = Clipboard::encode_slot(index("source")?, index("copy")?, index("paste")?, parse_value(sub)?)?;
            Ok(encoded.to_string())
        }
        Some(("decode", sub)) => {
            let raw = sub.get_one::<String>("hex").context("missing hex")?;
            let bytes = hex::decode(raw.trim()).context("clipboard must be hex")?;
            let clipboard = Clipboard::decode(&bytes)?;
            Ok(serde_json::to_string_pretty(&clipboard)?)
        }
        _ => bail!("expected one of: encode, slot, decode"),
    }
}

fn load_plan(path: &Path, config: &ClientConfig) -> Result<Workflow<EncoderKind>> {
    let document = parse_plan_file(path)?;
    document.to_workflow(&config.network.contracts)
}

fn run_data(config: &ClientConfig) -> RunData {
    RunData {
        slippage: config.default_slippage,
        ..RunData::default()
    }
}

async fn run_plan_cmd(config: &ClientConfig, m: &ArgMatches) -> Result<String> {
    let (name, sub) = m.subcommand().context("expected one of: preview, simulate")?;
    let file = sub.get_one::<String>("file").map(|path| expand_tilde(path)).unwrap_or_else(PathBuf::new);
    let amount = parse_u256("amount", sub.get_one::<String>("amount").map(String::as_str).unwrap_or("0"))?;
    let workflow = load_plan(&file, config)?;
    let data = run_data(config);

    let output = match name {
        "preview" => {
            let mode_raw = sub.get_one::<String>("mode").map(String::as_str).unwrap_or("execute");
            let mode = RunMode::from_str(mode_raw).map_err(|e| anyhow!("{e}"))?;
            let amount_out = workflow.build(amount, mode, &data).await?;
            let call = if workflow.is_empty() {
                None
            } else {
                let call = workflow.finalize()?;
                Some(json!({
                    "target": call.target,
                    "function": call.function,
                    "value": call.value,
                    "calldata": call.calldata(),
                }))
            };
            json!({
                "workflow": workflow.name(),
                "mode": mode,
                "amount_in": amount,
                "amount_out": amount_out,
                "steps": workflow.summarize_steps(),
                "tags": workflow.tags(),
                "value": workflow.value(),
                "call": call,
            })
        }
        "simulate" => {
            let from = sub
                .get_one::<String>("from")
                .map(|raw| Address::from_str(raw).with_context(|| format!("invalid --from '{raw}'")))
                .transpose()?;
            let transport = JsonRpcClient::from_config(config)?;
            let results = workflow.call_static(amount, &data, &transport, from).await?;
            json!({
                "workflow": workflow.name(),
                "amount_in": amount,
                "results": results,
            })
        }
        other => bail!("unknown plan command '{other}'"),
    };
    Ok(serde_json::to_string_pretty(&output)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn clipboard_output(args: &[&str]) -> Result<String> {
        let matches = build_cli().try_get_matches_from(args)?;
        let (_, sub) = matches.subcommand().context("subcommand")?;
        run_clipboard_cmd(sub)
    }

    #[test]
    fn slot_and_explicit_instructions_agree() {
        let from_slot = clipboard_output(&["clipflow", "clipboard", "slot", "4", "0", "2"]).expect("slot");
        let explicit = clipboard_output(&["clipflow", "clipboard", "encode", "--instructions", "[4,32,100]"]).expect("encode");
        assert_eq!(from_slot, explicit);
        assert!(from_slot.starts_with("0x0100"));
    }

    #[test]
    fn decode_prints_kind_and_value() {
        let encoded = clipboard_output(&["clipflow", "clipboard", "encode", "-i", "[]", "--value", "10"]).expect("encode");
        let decoded = clipboard_output(&["clipflow", "clipboard", "decode", encoded.as_str()]).expect("decode");
        let json: serde_json::Value = serde_json::from_str(&decoded).expect("json");
        assert_eq!(json["kind"], "static");
        assert_eq!(json["value"], "0xa");
    }

    #[test]
    fn rejects_unsupported_instruction_shapes() {
        assert!(clipboard_output(&["clipflow", "clipboard", "encode", "-i", "{\"a\":1}"]).is_err());
        assert!(build_cli().try_get_matches_from(["clipflow", "clipboard", "slot", "1"]).is_err());
    }

    #[tokio::test]
    async fn preview_builds_plan_offline() {
        let temp_dir = tempfile::tempdir().expect("tempdir");
        let path = temp_dir.path().join("plan.yaml");
        fs::write(
            &path,
            "workflow: demo\nkind: farm\nsteps:\n  - name: a\n    call_data: \"0xaa\"\n    tag: first\n  - name: b\n    call_data: \"0xbb\"\n",
        )
        .expect("write plan");
        let file = path.to_string_lossy().to_string();

        let matches = build_cli()
            .try_get_matches_from(["clipflow", "plan", "preview", "--file", file.as_str(), "--amount", "5"])
            .expect("parse args");
        let (_, sub) = matches.subcommand().expect("plan");
        let output = run_plan_cmd(&ClientConfig::default(), sub).await.expect("preview");
        let json: serde_json::Value = serde_json::from_str(&output).expect("json");
        assert_eq!(json["workflow"], "demo");
        assert_eq!(json["tags"]["first"], 0);
        assert_eq!(json["call"]["function"], "farm");
        assert_eq!(json["steps"].as_array().map(Vec::len), Some(2));
    }
}
