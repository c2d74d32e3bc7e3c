use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use ed25519_dalek::SigningKey;
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use guarded_token::{
    chain::Chain,
    config::TokenConfig,
    ledger::{format_units, parse_units, Account, Amount, DECIMALS},
    quorum::ApprovalState,
    token::{Call, GovernedToken, TokenSnapshot},
};

//==================== CLI ====================//

#[derive(Parser)]
#[command(name = "g1tk")]
#[command(about = "Guardian-governed token ledger", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// State file holding the token and native balances
    #[arg(short, long, global = true, default_value = "g1tk-state.json")]
    state: PathBuf,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate an Ed25519 keypair and print its account
    Keygen {
        #[arg(long)]
        out_dir: PathBuf,
    },
    /// Deploy a token from a genesis config into a fresh state file
    Init {
        #[arg(long)]
        config: PathBuf,
        /// Replace an existing state file
        #[arg(long)]
        force: bool,
    },
    /// Credit native currency to an account (local faucet)
    Fund { account: Account, amount: String },
    /// Supply, reserve, pending requests and state root
    Status,
    /// Token and native balance of an account
    Balance { account: Account },
    Transfer {
        #[arg(long)]
        from: Account,
        #[arg(long)]
        to: Account,
        amount: String,
    },
    /// Allow a spender to move units on the owner's behalf
    Approve {
        #[arg(long)]
        owner: Account,
        #[arg(long)]
        spender: Account,
        amount: String,
    },
    TransferFrom {
        #[arg(long)]
        spender: Account,
        #[arg(long)]
        from: Account,
        #[arg(long)]
        to: Account,
        amount: String,
    },
    /// Buy units at the sale price; the payment defaults to the exact quote
    Buy {
        #[arg(long)]
        from: Account,
        amount: String,
        #[arg(long)]
        value: Option<String>,
    },
    /// Send a bare native payment to the contract
    Pay {
        #[arg(long)]
        from: Account,
        value: String,
    },
    ApproveMint {
        #[arg(long)]
        guardian: Account,
        #[arg(long)]
        recipient: Account,
        amount: String,
    },
    ApproveWithdrawal {
        #[arg(long)]
        guardian: Account,
        amount: String,
    },
    /// Print the event log as JSON lines
    Events,
}

//==================== state file ====================//

#[derive(Serialize, Deserialize)]
struct StateFile {
    version: u8,
    token: TokenSnapshot,
    native: BTreeMap<Account, Amount>,
}

struct Session {
    token: GovernedToken,
    chain: Chain,
}

fn load_state(path: &Path) -> Result<Session> {
    let bytes =
        fs::read(path).with_context(|| format!("reading state file {}", path.display()))?;
    let file: StateFile = serde_json::from_slice(&bytes).context("parsing state file")?;
    if file.version != 1 {
        bail!("unsupported state file version {}", file.version);
    }
    let token = GovernedToken::restore(file.token).context("restoring token state")?;
    Ok(Session {
        token,
        chain: Chain::from_balances(file.native),
    })
}

fn save_state(path: &Path, session: &Session) -> Result<()> {
    let file = StateFile {
        version: 1,
        token: session.token.snapshot(),
        native: session.chain.balances().clone(),
    };
    let bytes = serde_json::to_vec_pretty(&file)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes).with_context(|| format!("writing {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("replacing {}", path.display()))?;
    Ok(())
}

fn units(input: &str) -> Result<Amount> {
    parse_units(input, DECIMALS).with_context(|| format!("parsing amount {input:?}"))
}

fn show(amount: Amount) -> String {
    format_units(amount, DECIMALS)
}

fn describe(state: ApprovalState) -> String {
    match state {
        ApprovalState::NoRequest => "no request".to_string(),
        ApprovalState::Pending {
            approvals,
            threshold,
        } => format!("pending {approvals}/{threshold}"),
        ApprovalState::Executed => "executed".to_string(),
    }
}

//==================== commands ====================//

fn keygen_cmd(out_dir: &Path) -> Result<()> {
    fs::create_dir_all(out_dir).with_context(|| format!("creating {}", out_dir.display()))?;
    let mut sk_bytes = [0u8; 32];
    OsRng.fill_bytes(&mut sk_bytes);
    let sk = SigningKey::from_bytes(&sk_bytes);
    let pk = sk.verifying_key();
    let account = Account::from_verifying_key(&pk);

    fs::write(out_dir.join("sk.hex"), hex::encode(sk_bytes))?;
    fs::write(out_dir.join("pk.hex"), hex::encode(pk.as_bytes()))?;
    fs::write(out_dir.join("account.txt"), account.as_str())?;
    println!("{account}");
    Ok(())
}

fn init_cmd(state: &Path, config: &Path, force: bool) -> Result<()> {
    if state.exists() && !force {
        bail!("{} already exists (use --force to replace)", state.display());
    }
    let config = TokenConfig::load(config)
        .with_context(|| format!("loading config {}", config.display()))?;
    let token = config.deploy()?;
    println!(
        "{} ({}) deployed at {}, owner {}",
        token.name(),
        token.symbol(),
        token.address(),
        token.owner()
    );
    save_state(
        state,
        &Session {
            token,
            chain: Chain::new(),
        },
    )
}

fn status_cmd(session: &Session) {
    let token = &session.token;
    println!("token        {} ({})", token.name(), token.symbol());
    println!("address      {}", token.address());
    println!("owner        {}", token.owner());
    println!("total supply {}", show(token.total_supply()));
    println!("reserve      {}", show(token.reserve(&session.chain)));
    println!("sale price   {}", show(token.sale_price()));
    for (idx, guardian) in token.governance().guardians().members().iter().enumerate() {
        println!("guardian {}   {}", idx + 1, guardian);
    }
    let snapshot = token.snapshot();
    for pending in &snapshot.pending_mints {
        println!(
            "pending mint {} -> {} ({} approvals)",
            show(pending.amount),
            pending.recipient,
            pending.approvers.len()
        );
    }
    for pending in &snapshot.pending_withdrawals {
        println!(
            "pending withdrawal {} ({} approvals)",
            show(pending.amount),
            pending.approvers.len()
        );
    }
    println!("state root   {}", snapshot.state_root);
}

fn run(cli: Cli) -> Result<()> {
    let state = cli.state.as_path();
    match cli.command {
        Commands::Keygen { out_dir } => return keygen_cmd(&out_dir),
        Commands::Init { config, force } => return init_cmd(state, &config, force),
        _ => {}
    }

    let mut session = load_state(state)?;
    let mut dirty = true;
    match cli.command {
        Commands::Keygen { .. } | Commands::Init { .. } => unreachable!("handled above"),
        Commands::Fund { account, amount } => {
            session.chain.fund(&account, units(&amount)?)?;
            println!("{account} native balance {}", show(session.chain.balance(&account)));
        }
        Commands::Status => {
            status_cmd(&session);
            dirty = false;
        }
        Commands::Balance { account } => {
            println!("tokens {}", show(session.token.balance_of(&account)));
            println!("native {}", show(session.chain.balance(&account)));
            dirty = false;
        }
        Commands::Transfer { from, to, amount } => {
            session.token.transfer(&from, &to, units(&amount)?)?;
            println!("transferred {amount} {} {from} -> {to}", session.token.symbol());
        }
        Commands::Approve {
            owner,
            spender,
            amount,
        } => {
            session.token.approve(&owner, &spender, units(&amount)?)?;
            println!("{spender} may spend {amount} from {owner}");
        }
        Commands::TransferFrom {
            spender,
            from,
            to,
            amount,
        } => {
            session
                .token
                .transfer_from(&spender, &from, &to, units(&amount)?)?;
            println!("{spender} moved {amount} {from} -> {to}");
        }
        Commands::Buy {
            from,
            amount,
            value,
        } => {
            let amount = units(&amount)?;
            let value = match value {
                Some(v) => units(&v)?,
                None => session.token.quote(amount)?,
            };
            let call = Call::new(from).with_value(value);
            session.token.buy_tokens(&mut session.chain, &call, amount)?;
            println!("bought {} for {} native", show(amount), show(value));
        }
        Commands::Pay { from, value } => {
            let call = Call::new(from).with_value(units(&value)?);
            let credited = session.token.receive(&mut session.chain, &call)?;
            println!("credited {credited} minimal units");
        }
        Commands::ApproveMint {
            guardian,
            recipient,
            amount,
        } => {
            let state = session
                .token
                .approve_mint(&guardian, &recipient, units(&amount)?)?;
            println!("mint {amount} -> {recipient}: {}", describe(state));
        }
        Commands::ApproveWithdrawal { guardian, amount } => {
            let value = units(&amount)?;
            let state = session
                .token
                .approve_withdrawal(&mut session.chain, &guardian, value)?;
            println!("withdrawal {amount}: {}", describe(state));
        }
        Commands::Events => {
            for event in session.token.events() {
                println!("{}", serde_json::to_string(event)?);
            }
            dirty = false;
        }
    }

    if dirty {
        save_state(state, &session)?;
    }
    Ok(())
}

//==================== main ====================//

fn main() -> Result<()> {
    let cli = Cli::parse();
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    run(cli)
}
