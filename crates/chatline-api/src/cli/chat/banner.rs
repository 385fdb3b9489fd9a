//! Welcome banner display for chat sessions.

use console::style;

/// Print the welcome banner at the start of a chat session.
pub fn print_welcome_banner(server: &str, session_id: &str, connection_id: &str, history: usize) {
    println!();
    println!("  {} {}", style("*").cyan().bold(), style("Chatline").cyan().bold());
    println!();
    println!("  {}     {}", style("Server:").bold(), style(server).dim());
    println!("  {}    {}", style("Session:").bold(), style(session_id).dim());
    println!("  {} {}", style("Connection:").bold(), style(connection_id).dim());
    if history > 0 {
        println!(
            "  {}    {}",
            style("History:").bold(),
            style(format!(
                "{history} earlier message{}",
                if history == 1 { "" } else { "s" }
            ))
            .dim()
        );
    }
    println!();
    println!(
        "  {}",
        style("Type /help for commands, Ctrl+D to exit").dim()
    );
    println!("  {}", style("---").dim());
    println!();
}
