use colored::Colorize;

pub fn handle_error(err: anyhow::Error) -> ! {
    eprintln!("{} {:#}", "Error:".red().bold(), err);

    let msg = format!("{err:#}").to_lowercase();

    if msg.contains("not privileged") || msg.contains("permission denied") {
        eprintln!("\n{}", "Suggestion:".yellow().bold());
        eprintln!("  Ensure you are an administrator, or run the command as root:");
        eprintln!("  {} sudo kisit <command>", "$".dimmed());
    }

    if msg.contains("profile not found") {
        eprintln!("\n{}", "Suggestion:".yellow().bold());
        eprintln!("  List available profiles with:");
        eprintln!("  {} kisit profile list", "$".dimmed());
    }

    if msg.contains("nothing selected") {
        eprintln!("\n{}", "Suggestion:".yellow().bold());
        eprintln!("  Choose what the profile restricts first:");
        eprintln!(
            "  {} kisit profile set-type <profile> website denylist",
            "$".dimmed()
        );
    }

    if msg.contains("escalation failed") {
        eprintln!("\n{}", "Suggestion:".yellow().bold());
        eprintln!("  Authorization was refused or polkit is unavailable.");
    }

    std::process::exit(1);
}
