use clap::{App, Arg, SubCommand};
use num_enum::TryFromPrimitive;

mod command_e2e;
mod command_keygen;
mod config;

use command_e2e::command_e2e;
use command_keygen::command_keygen;
use config::Config;

#[derive(TryFromPrimitive, PartialEq, Copy, Clone)]
#[repr(u8)]
pub enum Verbosity {
    Silent = 0,
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
}

impl Verbosity {
    fn filter(self) -> log::LevelFilter {
        match self {
            Verbosity::Silent => log::LevelFilter::Off,
            Verbosity::Error => log::LevelFilter::Error,
            Verbosity::Warn => log::LevelFilter::Warn,
            Verbosity::Info => log::LevelFilter::Info,
            Verbosity::Debug => log::LevelFilter::Debug,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = App::new("Ballotflow CLI")
        .version("0.1")
        .about("Runs census-gated voting processes against an in-memory network")
        .arg(
            Arg::with_name("v")
                .short("v")
                .multiple(true)
                .help("Sets the level of verbosity"),
        )
        .subcommand(
            SubCommand::with_name("e2e")
                .about("Register an entity, build a census, run a process and tally it"),
        )
        .subcommand(
            SubCommand::with_name("keygen")
                .about("Print the public key and address of a keyring index")
                .arg(
                    Arg::with_name("INDEX")
                        .index(1)
                        .required(true)
                        .help("Key index: 0 is the entity, 1..=N the voters"),
                ),
        )
        .get_matches();

    let level = Verbosity::Warn as u8 + matches.occurrences_of("v").min(2) as u8;
    let verbosity = Verbosity::try_from_primitive(level).unwrap_or(Verbosity::Debug);
    env_logger::Builder::new()
        .filter_level(verbosity.filter())
        .parse_env("BALLOTFLOW_LOG")
        .init();

    let config = Config::from_env()?;

    if let Some(matches) = matches.subcommand_matches("e2e") {
        command_e2e(matches, &config).await?;
    } else if let Some(matches) = matches.subcommand_matches("keygen") {
        command_keygen(matches, &config)?;
    } else {
        eprintln!("ballotflow: a subcommand is required, see --help");
        std::process::exit(1);
    }

    Ok(())
}
