//! Built-in command set for a standalone node.

use std::time::Duration;

use recon_gateway::adapters::{CommandDispatcher, CommandSender};
use recon_gateway::ports::DispatchError;

/// Permission required by `announce`.
pub const ANNOUNCE_PERMISSION: &str = "recon.announce";

/// Delay before `announce` confirms delivery from outside the dispatch.
const ANNOUNCE_ACK_DELAY: Duration = Duration::from_millis(20);

const HELP: &[&str] = &[
    "§6Available commands:",
    "§e say <message> §7- broadcast a message",
    "§e announce <message> §7- broadcast an announcement (recon.announce)",
    "§e list §7- list online actors",
    "§e whoami §7- show who you are running as",
    "§e help §7- show this list",
];

/// `say`, `announce`, `list`, `whoami` and `help`.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinDispatcher;

impl CommandDispatcher for BuiltinDispatcher {
    fn dispatch(&self, sender: &mut CommandSender<'_>, command: &str) -> Result<bool, DispatchError> {
        let command = command.trim();
        let (name, args) = match command.split_once(' ') {
            Some((name, args)) => (name, args.trim()),
            None => (command, ""),
        };

        match name.to_ascii_lowercase().as_str() {
            "help" => {
                for line in HELP {
                    sender.send_message(line);
                }
                Ok(true)
            }
            "list" => {
                let online = sender.online_actors();
                sender.send_message(format!(
                    "§6There are §c{}§6 actors online: §f{}",
                    online.len(),
                    online.join(", ")
                ));
                Ok(true)
            }
            "whoami" => {
                sender.send_message(format!("§7You are §f{}", sender.name()));
                sender.send_message(format!(
                    "§7Elevated: §f{}",
                    if sender.is_elevated() { "yes" } else { "no" }
                ));
                let permissions: Vec<&str> = sender.permissions().collect();
                let listed = if permissions.is_empty() {
                    "none".to_string()
                } else {
                    permissions.join(", ")
                };
                sender.send_message(format!("§7Permissions: §f{listed}"));
                Ok(true)
            }
            "say" => {
                if args.is_empty() {
                    sender.send_message("§cUsage: say <message>");
                    return Ok(false);
                }
                sender.broadcast(format!("§d[{}] §f{}", sender.name(), args));
                Ok(true)
            }
            "announce" => {
                if !sender.has_permission(ANNOUNCE_PERMISSION) {
                    return Err(DispatchError::PermissionDenied(ANNOUNCE_PERMISSION.to_string()));
                }
                if args.is_empty() {
                    sender.send_message("§cUsage: announce <message>");
                    return Ok(false);
                }
                sender.broadcast(format!("§c[Announcement] §f{args}"));

                let ack = sender.deferred_output();
                std::thread::spawn(move || {
                    std::thread::sleep(ANNOUNCE_ACK_DELAY);
                    ack.send_message("§7Announcement delivered");
                });
                Ok(true)
            }
            _ => {
                sender.send_message("§cUnknown command. Type \"help\" for help.");
                Ok(false)
            }
        }
    }
}
