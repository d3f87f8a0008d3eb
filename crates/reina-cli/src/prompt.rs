//! Terminal confirmation before pre-existing apps are deleted.

use async_trait::async_trait;
use dialoguer::Input;
use reina_core::Confirm;
use tracing::warn;

const PROMPT: &str = r#"Type "OK" to delete the apps above"#;

/// Asks on the controlling terminal. Anything but `OK` declines.
pub struct TerminalConfirm;

#[async_trait]
impl Confirm for TerminalConfirm {
    async fn confirm_deletion(&self, apps: &[String]) -> bool {
        let apps = apps.to_vec();
        match tokio::task::spawn_blocking(move || ask(&apps)).await {
            Ok(answer) => answer,
            Err(e) => {
                warn!(error = %e, "confirmation prompt did not complete");
                false
            }
        }
    }
}

fn ask(apps: &[String]) -> bool {
    println!("The following apps already exist:");
    for app in apps {
        println!("  {app}");
    }

    let answer = Input::<String>::new()
        .with_prompt(PROMPT)
        .allow_empty(true)
        .interact_text();

    match answer {
        Ok(answer) => is_confirmation(&answer),
        Err(e) => {
            warn!(error = %e, "could not read confirmation");
            false
        }
    }
}

/// Only the literal `OK` confirms; surrounding whitespace is ignored.
pub fn is_confirmation(answer: &str) -> bool {
    answer.trim() == "OK"
}
