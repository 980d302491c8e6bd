use std::str::FromStr;

use anyhow::{Error, Result};
use clap::ArgMatches;
use crossbeam_channel::{bounded, Receiver};

/// Channel receiving a message every time ctrl-c is pressed.
pub(crate) fn ctrl_channel() -> Result<Receiver<()>> {
    let (sender, receiver) = bounded(10);
    ctrlc::set_handler(move || {
        let _ = sender.send(());
    })?;
    Ok(receiver)
}

/// Parses the value of an argument that has a default or is required.
pub(crate) fn parse_arg<T>(matches: &ArgMatches, name: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let value = matches
        .value_of(name)
        .ok_or_else(|| Error::msg(format!("missing value for argument: {}", name)))?;
    value
        .parse()
        .map_err(|e| Error::msg(format!("failed parsing {} value \"{}\": {}", name, value, e)))
}
