//! ebb-cli: Command-line front end for a local Ebb vote-escrow.
//!
//! Keeps the escrow and its in-memory token in a bincode snapshot under the
//! data directory, applies one operation per invocation, and prints the
//! result as JSON.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::{debug, info};

use ebb_core::address::Address;
use ebb_core::types::{BlockInfo, LockedBalance, Point, TxContext};
use ebb_escrow::{
    snapshot, EscrowConfig, EscrowEvent, EscrowSnapshot, MemoryToken, TokenSnapshot,
    VotingEscrow,
};

/// Local vote-escrow ledger.
#[derive(Parser, Debug)]
#[command(name = "ebb-cli", version, about = "Lock tokens, get decaying voting power")]
struct Cli {
    /// Data directory for the state snapshot
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Log output format ("text" or "json")
    #[arg(long, global = true, default_value = "text")]
    log_format: String,

    /// Block timestamp in unix seconds (default: wall clock)
    #[arg(long, global = true)]
    now: Option<u64>,

    /// Block height (default: one past the last recorded height)
    #[arg(long, global = true)]
    height: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create fresh state seeded at the current block.
    Init(InitArgs),
    /// Credit tokens to an account.
    Mint(TransferArgs),
    /// Set how much the escrow may pull from an account.
    Approve(TransferArgs),
    /// Lock tokens until a future time.
    CreateLock(CreateLockArgs),
    /// Add tokens to an existing lock.
    IncreaseAmount(AmountArgs),
    /// Move an existing lock's end later.
    IncreaseUnlockTime(UnlockArgs),
    /// Add tokens to another account's lock.
    DepositFor(DepositForArgs),
    /// Withdraw an expired lock.
    Withdraw(AccountArgs),
    /// Advance the global history.
    Checkpoint,
    /// Voting power of an account.
    Balance(BalanceArgs),
    /// Aggregate voting power.
    Supply(AtArgs),
    /// Current lock of an account.
    Locked(AccountArgs),
    /// Commit a new admin (admin only).
    CommitAdmin(CommitAdminArgs),
    /// Apply the committed admin (admin only).
    ApplyAdmin(AccountArgs),
}

#[derive(Args, Debug)]
struct InitArgs {
    /// Initial admin
    #[arg(long)]
    admin: Address,

    /// Overwrite existing state
    #[arg(long)]
    force: bool,
}

#[derive(Args, Debug)]
struct TransferArgs {
    /// Account to credit or approve for
    #[arg(long)]
    account: Address,

    /// Token amount in base units
    #[arg(long)]
    amount: u128,
}

#[derive(Args, Debug)]
struct CreateLockArgs {
    /// Caller
    #[arg(long)]
    from: Address,

    /// Token amount in base units
    #[arg(long)]
    amount: u128,

    /// Unlock time in unix seconds (rounded down to a week)
    #[arg(long)]
    unlock_time: u64,
}

#[derive(Args, Debug)]
struct AmountArgs {
    /// Caller
    #[arg(long)]
    from: Address,

    /// Token amount in base units
    #[arg(long)]
    amount: u128,
}

#[derive(Args, Debug)]
struct UnlockArgs {
    /// Caller
    #[arg(long)]
    from: Address,

    /// New unlock time in unix seconds (rounded down to a week)
    #[arg(long)]
    unlock_time: u64,
}

#[derive(Args, Debug)]
struct DepositForArgs {
    /// Payer
    #[arg(long)]
    from: Address,

    /// Lock owner receiving the deposit
    #[arg(long)]
    to: Address,

    /// Token amount in base units
    #[arg(long)]
    amount: u128,
}

#[derive(Args, Debug)]
struct AccountArgs {
    /// Account
    #[arg(long)]
    from: Address,
}

#[derive(Args, Debug)]
struct CommitAdminArgs {
    /// Caller (current admin)
    #[arg(long)]
    from: Address,

    /// Next admin
    #[arg(long)]
    admin: Address,
}

#[derive(Args, Debug)]
struct AtArgs {
    /// Evaluate at this unix timestamp
    #[arg(long, conflicts_with = "at_block")]
    at_time: Option<u64>,

    /// Evaluate at this block height
    #[arg(long)]
    at_block: Option<u64>,
}

#[derive(Args, Debug)]
struct BalanceArgs {
    /// Account
    #[arg(long)]
    account: Address,

    #[command(flatten)]
    at: AtArgs,
}

/// Everything persisted between invocations.
#[derive(bincode::Encode, bincode::Decode)]
struct CliState {
    escrow: EscrowSnapshot,
    token: TokenSnapshot,
}

/// Printed result of one invocation.
#[derive(Serialize)]
struct Receipt {
    block: BlockInfo,
    outcome: Outcome,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    events: Vec<EscrowEvent>,
}

#[derive(Serialize)]
#[serde(rename_all = "snake_case")]
enum Outcome {
    Initialized {
        admin: Address,
        path: PathBuf,
    },
    Token {
        account: Address,
        balance: u128,
        allowance: u128,
    },
    Lock {
        account: Address,
        locked: LockedBalance,
        voting_power: u128,
    },
    Withdrawn {
        account: Address,
        value: u128,
    },
    Checkpoint {
        from_epoch: u64,
        to_epoch: u64,
        weekly_points: u64,
        truncated: bool,
    },
    VotingPower {
        account: Option<Address>,
        voting_power: u128,
    },
    Supply {
        voting_power: u128,
        locked_supply: u128,
        epoch: u64,
    },
    Admin {
        admin: Address,
        future_admin: Address,
    },
}

/// Escrow and token reconstructed from the snapshot.
struct Session {
    config: EscrowConfig,
    escrow: VotingEscrow,
    token: Arc<MemoryToken>,
    block: BlockInfo,
}

impl Session {
    fn open(config: EscrowConfig, now: Option<u64>, height: Option<u64>) -> Result<Self> {
        let path = config.snapshot_path();
        let state: CliState = snapshot::load(&path)
            .with_context(|| format!("failed to load state from {} (run `init` first)", path.display()))?;
        let block = current_block(&state.escrow.ledger.global().last(), now, height)?;

        let token = Arc::new(MemoryToken::from_snapshot(config.escrow_address, state.token));
        let escrow = VotingEscrow::from_snapshot(config.clone(), token.clone(), state.escrow);
        debug!(epoch = escrow.epoch(), ts = block.timestamp, height = block.height, "state loaded");
        Ok(Self {
            config,
            escrow,
            token,
            block,
        })
    }

    fn ctx(&self, sender: Address) -> TxContext {
        TxContext::direct(sender, self.block)
    }

    fn save(&self) -> Result<()> {
        let state = CliState {
            escrow: self.escrow.snapshot(),
            token: self.token.snapshot(),
        };
        let path = self.config.snapshot_path();
        snapshot::save(&path, &state)
            .with_context(|| format!("failed to save state to {}", path.display()))
    }

    fn lock_outcome(&self, account: Address) -> Outcome {
        Outcome::Lock {
            account,
            locked: self.escrow.locked(&account),
            voting_power: self.escrow.voting_power_of(&account, self.block.timestamp),
        }
    }

    fn token_outcome(&self, account: Address) -> Outcome {
        Outcome::Token {
            account,
            balance: self.token.balance_of(&account),
            allowance: self.token.allowance(&account, &self.config.escrow_address),
        }
    }

    /// Commit state and package the outcome with the events it produced.
    fn commit(self, outcome: Outcome) -> Result<Receipt> {
        self.save()?;
        Ok(Receipt {
            block: self.block,
            outcome,
            events: self.escrow.take_events(),
        })
    }

    fn read(self, outcome: Outcome) -> Receipt {
        Receipt {
            block: self.block,
            outcome,
            events: Vec::new(),
        }
    }
}

fn wall_clock() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0)
}

/// Resolve the block to act at, refusing to move behind recorded history.
fn current_block(last: &Point, now: Option<u64>, height: Option<u64>) -> Result<BlockInfo> {
    let timestamp = now.unwrap_or_else(wall_clock);
    let height = height.unwrap_or(if timestamp > last.ts { last.blk + 1 } else { last.blk });
    if timestamp < last.ts || height < last.blk {
        bail!(
            "block (ts={timestamp}, height={height}) is behind recorded history (ts={}, height={})",
            last.ts,
            last.blk
        );
    }
    Ok(BlockInfo::new(timestamp, height))
}

fn init(config: &EscrowConfig, args: InitArgs, now: Option<u64>, height: Option<u64>) -> Result<Receipt> {
    let path = config.snapshot_path();
    if path.exists() && !args.force {
        bail!("state already exists: {} (pass --force to overwrite)", path.display());
    }
    let block = BlockInfo::new(now.unwrap_or_else(wall_clock), height.unwrap_or(0));
    let state = CliState {
        escrow: EscrowSnapshot::new(args.admin, block),
        token: TokenSnapshot::default(),
    };
    snapshot::save(&path, &state)
        .with_context(|| format!("failed to save state to {}", path.display()))?;
    info!(admin = %args.admin, path = %path.display(), "initialized escrow state");
    Ok(Receipt {
        block,
        outcome: Outcome::Initialized {
            admin: args.admin,
            path,
        },
        events: Vec::new(),
    })
}

/// Map command-line flags onto the escrow configuration.
fn config_from(cli: &Cli) -> EscrowConfig {
    let mut config = EscrowConfig {
        log_level: cli.log_level.clone(),
        ..EscrowConfig::default()
    };
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    config
}

fn run(cli: Cli, config: EscrowConfig) -> Result<Receipt> {
    let command = match cli.command {
        Command::Init(args) => return init(&config, args, cli.now, cli.height),
        command => command,
    };
    let session = Session::open(config, cli.now, cli.height)?;
    execute(session, command)
}

fn execute(session: Session, command: Command) -> Result<Receipt> {
    match command {
        Command::Init(_) => bail!("state is already initialized"),
        Command::Mint(args) => {
            session.token.mint(&args.account, args.amount);
            let outcome = session.token_outcome(args.account);
            session.commit(outcome)
        }
        Command::Approve(args) => {
            let spender = session.config.escrow_address;
            session.token.approve(&args.account, &spender, args.amount);
            let outcome = session.token_outcome(args.account);
            session.commit(outcome)
        }
        Command::CreateLock(args) => {
            session
                .escrow
                .create_lock(&session.ctx(args.from), args.amount, args.unlock_time)?;
            let outcome = session.lock_outcome(args.from);
            session.commit(outcome)
        }
        Command::IncreaseAmount(args) => {
            session
                .escrow
                .increase_amount(&session.ctx(args.from), args.amount)?;
            let outcome = session.lock_outcome(args.from);
            session.commit(outcome)
        }
        Command::IncreaseUnlockTime(args) => {
            session
                .escrow
                .increase_unlock_time(&session.ctx(args.from), args.unlock_time)?;
            let outcome = session.lock_outcome(args.from);
            session.commit(outcome)
        }
        Command::DepositFor(args) => {
            session
                .escrow
                .deposit_for(&session.ctx(args.from), &args.to, args.amount)?;
            let outcome = session.lock_outcome(args.to);
            session.commit(outcome)
        }
        Command::Withdraw(args) => {
            let value = session.escrow.withdraw(&session.ctx(args.from))?;
            session.commit(Outcome::Withdrawn {
                account: args.from,
                value,
            })
        }
        Command::Checkpoint => {
            let report = session.escrow.checkpoint(session.block)?;
            session.commit(Outcome::Checkpoint {
                from_epoch: report.from_epoch,
                to_epoch: report.to_epoch,
                weekly_points: report.weekly_points,
                truncated: report.truncated,
            })
        }
        Command::Balance(args) => {
            let voting_power = match (args.at.at_block, args.at.at_time) {
                (Some(block), _) => {
                    session
                        .escrow
                        .voting_power_of_at(&args.account, block, session.block)?
                }
                (None, t) => session
                    .escrow
                    .voting_power_of(&args.account, t.unwrap_or(session.block.timestamp)),
            };
            Ok(session.read(Outcome::VotingPower {
                account: Some(args.account),
                voting_power,
            }))
        }
        Command::Supply(at) => {
            let voting_power = match (at.at_block, at.at_time) {
                (Some(block), _) => session.escrow.total_voting_power_at(block, session.block)?,
                (None, t) => session
                    .escrow
                    .total_voting_power(t.unwrap_or(session.block.timestamp)),
            };
            let outcome = Outcome::Supply {
                voting_power,
                locked_supply: session.escrow.supply(),
                epoch: session.escrow.epoch(),
            };
            Ok(session.read(outcome))
        }
        Command::Locked(args) => {
            let outcome = session.lock_outcome(args.from);
            Ok(session.read(outcome))
        }
        Command::CommitAdmin(args) => {
            session
                .escrow
                .commit_transfer_ownership(&session.ctx(args.from), args.admin)?;
            let outcome = Outcome::Admin {
                admin: session.escrow.admin(),
                future_admin: session.escrow.future_admin(),
            };
            session.commit(outcome)
        }
        Command::ApplyAdmin(args) => {
            session
                .escrow
                .apply_transfer_ownership(&session.ctx(args.from))?;
            let outcome = Outcome::Admin {
                admin: session.escrow.admin(),
                future_admin: session.escrow.future_admin(),
            };
            session.commit(outcome)
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config_from(&cli);
    init_logging(&config.log_level, &cli.log_format);

    let receipt = run(cli, config)?;
    println!("{}", serde_json::to_string_pretty(&receipt)?);
    Ok(())
}

/// Initialize tracing subscriber with the given log level and output format.
///
/// Logs go to stderr so stdout carries only the JSON receipt. Pass
/// `format = "json"` for structured output; any other value gives text.
fn init_logging(level_str: &str, format: &str) {
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level_str));

    if format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}
