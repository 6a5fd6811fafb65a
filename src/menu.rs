//! Interactive text menu.

use crate::ledger::Ledger;
use crate::session::{CameraOpener, Clock, Controller};
use anyhow::Result;
use rollcall_vision::FaceEncoder;
use std::io::{BufRead, Write};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuChoice {
    Register,
    TakeAttendance,
    Exit,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid menu choice {0:?}")]
pub struct InvalidMenuChoice(pub String);

impl FromStr for MenuChoice {
    type Err = InvalidMenuChoice;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1" => Ok(MenuChoice::Register),
            "2" => Ok(MenuChoice::TakeAttendance),
            "3" => Ok(MenuChoice::Exit),
            other => Err(InvalidMenuChoice(other.to_string())),
        }
    }
}

/// What the menu drives.
pub trait MenuActions {
    fn register(&mut self, name: &str) -> Result<()>;
    /// Run an attendance session and persist the ledger.
    fn take_attendance(&mut self) -> Result<()>;
}

/// A controller plus the ledger it marks for the life of the process.
pub struct App<C, E, K> {
    pub controller: Controller<C, E, K>,
    pub ledger: Ledger,
}

impl<C, E, K> MenuActions for App<C, E, K>
where
    C: CameraOpener,
    E: FaceEncoder,
    K: Clock,
{
    fn register(&mut self, name: &str) -> Result<()> {
        self.controller.register(name)?;
        Ok(())
    }

    fn take_attendance(&mut self) -> Result<()> {
        self.controller.take_attendance(&mut self.ledger)?;
        self.ledger.save()?;
        log::info!("Saved attendance to {}", self.ledger.path().display());
        Ok(())
    }
}

fn prompt<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
    text: &str,
) -> Result<Option<String>> {
    write!(output, "{}", text)?;
    output.flush()?;
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

/// Loop until the user exits or input ends. Failed actions are logged and
/// the menu carries on.
pub fn run<R, W, A>(mut input: R, mut output: W, actions: &mut A) -> Result<()>
where
    R: BufRead,
    W: Write,
    A: MenuActions + ?Sized,
{
    writeln!(output, "Welcome to Facial Recognition Based Attendance System")?;
    loop {
        writeln!(output, "\nMenu:")?;
        writeln!(output, "1. Get Student Face Information")?;
        writeln!(output, "2. Take Attendance")?;
        writeln!(output, "3. Exit")?;

        let Some(line) = prompt(&mut input, &mut output, "Enter your choice: ")? else {
            writeln!(output)?;
            writeln!(output, "Exiting...")?;
            return Ok(());
        };

        let outcome = match line.parse::<MenuChoice>() {
            Ok(MenuChoice::Register) => {
                match prompt(&mut input, &mut output, "Enter student name: ")? {
                    Some(name) => actions.register(&name),
                    None => continue,
                }
            }
            Ok(MenuChoice::TakeAttendance) => actions.take_attendance(),
            Ok(MenuChoice::Exit) => {
                writeln!(output, "Exiting...")?;
                return Ok(());
            }
            Err(e) => {
                log::debug!("{}", e);
                writeln!(output, "Invalid choice. Please try again.")?;
                continue;
            }
        };

        if let Err(e) = outcome {
            log::error!("{:#}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[derive(Default)]
    struct Recorder {
        calls: Vec<String>,
        fail_attendance: bool,
    }

    impl MenuActions for Recorder {
        fn register(&mut self, name: &str) -> Result<()> {
            self.calls.push(format!("register:{}", name));
            Ok(())
        }

        fn take_attendance(&mut self) -> Result<()> {
            self.calls.push("attend".to_string());
            if self.fail_attendance {
                anyhow::bail!("camera unplugged");
            }
            Ok(())
        }
    }

    fn drive(script: &str, actions: &mut Recorder) -> String {
        let mut out = Vec::new();
        run(Cursor::new(script.as_bytes()), &mut out, actions).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn parses_choices() {
        assert_eq!(" 1 ".parse::<MenuChoice>(), Ok(MenuChoice::Register));
        assert_eq!("2".parse::<MenuChoice>(), Ok(MenuChoice::TakeAttendance));
        assert_eq!("3".parse::<MenuChoice>(), Ok(MenuChoice::Exit));
        assert_eq!(
            "4".parse::<MenuChoice>(),
            Err(InvalidMenuChoice("4".to_string()))
        );
    }

    #[test]
    fn invalid_choice_is_an_error() {
        let err = "x".parse::<MenuChoice>().unwrap_err();
        assert_eq!(err.to_string(), "invalid menu choice \"x\"");
        let boxed: anyhow::Error = err.into();
        assert!(boxed.downcast_ref::<InvalidMenuChoice>().is_some());
    }

    #[test]
    fn dispatches_and_exits() {
        let mut actions = Recorder::default();
        let out = drive("1\nAlice\n2\n3\n1\nBob\n", &mut actions);
        assert_eq!(actions.calls, vec!["register:Alice", "attend"]);
        assert!(out.starts_with("Welcome to Facial Recognition Based Attendance System"));
        assert!(out.ends_with("Exiting...\n"));
    }

    #[test]
    fn invalid_choice_reprompts() {
        let mut actions = Recorder::default();
        let out = drive("x\n\n2\n3\n", &mut actions);
        assert_eq!(out.matches("Invalid choice. Please try again.").count(), 2);
        assert_eq!(out.matches("Enter your choice: ").count(), 4);
        assert_eq!(actions.calls, vec!["attend"]);
    }

    #[test]
    fn end_of_input_exits() {
        let mut actions = Recorder::default();
        let out = drive("", &mut actions);
        assert!(out.ends_with("Exiting...\n"));
        assert!(actions.calls.is_empty());
    }

    #[test]
    fn failed_action_keeps_menu_running() {
        let mut actions = Recorder {
            fail_attendance: true,
            ..Recorder::default()
        };
        drive("2\n2\n3\n", &mut actions);
        assert_eq!(actions.calls, vec!["attend", "attend"]);
    }
}
