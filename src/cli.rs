//! Command line: `vacation -f <sender> [-t] [--] <recipient>`.

use getopts::Options;

use crate::error::ConfigError;
use crate::pipeline::Invocation;

/// What the command line asked for.
#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    Run(Invocation),
    Help,
}

fn options() -> Options {
    let mut opts = Options::new();
    opts.optflag("h", "help", "Print this help message");
    opts.optopt("f", "from", "Envelope sender of the inbound message", "SENDER");
    opts.optflag(
        "t",
        "test",
        "Dry run: print the reply on stdout instead of sending it",
    );
    opts
}

/// Usage text for `program`.
pub fn usage(program: &str) -> String {
    let brief = format!("Usage: {program} -f SENDER [-t] [--] RECIPIENT\n\nReads the message on stdin.");
    options().usage(&brief)
}

/// Parse the arguments after the program name.
pub fn parse(args: &[String]) -> Result<Command, ConfigError> {
    let matches = options()
        .parse(args)
        .map_err(|e| ConfigError::ParseError(e.to_string()))?;

    if matches.opt_present("help") {
        return Ok(Command::Help);
    }

    let sender = matches.opt_str("from").ok_or_else(|| ConfigError::MissingRequired {
        key: "-f".into(),
        hint: "Pass the envelope sender, e.g. -f ${sender}".into(),
    })?;
    let recipient = matches
        .free
        .first()
        .cloned()
        .ok_or_else(|| ConfigError::MissingRequired {
            key: "recipient".into(),
            hint: "Pass the envelope recipient as the last argument, e.g. -- ${recipient}".into(),
        })?;

    Ok(Command::Run(Invocation {
        sender,
        recipient,
        dry_run: matches.opt_present("test"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn postfix_pipe_invocation() {
        let cmd = parse(&args(&["-f", "sender@example.net", "--", "user#example.org@autoreply.example.org"])).unwrap();
        assert_eq!(
            cmd,
            Command::Run(Invocation {
                sender: "sender@example.net".into(),
                recipient: "user#example.org@autoreply.example.org".into(),
                dry_run: false,
            })
        );
    }

    #[test]
    fn dry_run_flag() {
        let Command::Run(inv) = parse(&args(&["-t", "-f", "a@x.org", "b@y.org"])).unwrap() else {
            panic!("expected run");
        };
        assert!(inv.dry_run);
    }

    #[test]
    fn empty_sender_is_accepted_for_bounces() {
        let Command::Run(inv) = parse(&args(&["-f", "", "b@y.org"])).unwrap() else {
            panic!("expected run");
        };
        assert!(inv.sender.is_empty());
    }

    #[test]
    fn missing_arguments_are_errors() {
        assert!(matches!(
            parse(&args(&["b@y.org"])),
            Err(ConfigError::MissingRequired { .. })
        ));
        assert!(matches!(
            parse(&args(&["-f", "a@x.org"])),
            Err(ConfigError::MissingRequired { .. })
        ));
        assert!(matches!(parse(&args(&["-x"])), Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn help() {
        assert_eq!(parse(&args(&["-h"])).unwrap(), Command::Help);
        assert!(usage("vacation").contains("-f"));
    }
}
