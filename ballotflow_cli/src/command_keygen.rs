use crate::Config;
use anyhow::Context;
use ballotflow::{derivation_path, EntityId, IdentityProvider, KeyRef, Keyring};

pub fn command_keygen(matches: &clap::ArgMatches, config: &Config) -> anyhow::Result<()> {
    let index: KeyRef = matches
        .value_of("INDEX")
        .unwrap_or("0")
        .parse()
        .context("ballotflow keygen: invalid index")?;

    let keyring = Keyring::from_seed(&config.seed);
    let public = keyring.public_key(index)?;
    let address = keyring.address(index)?;

    println!("path: {}", derivation_path(index));
    println!("public-key: {}", hex::encode(public.to_bytes()));
    println!("address: {}", address);
    if index == 0 {
        println!("entity-id: {}", EntityId::from_address(&address));
    }

    Ok(())
}
