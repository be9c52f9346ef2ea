//! Terminal output surface
//!
//! Line-oriented printing for the interactive session. All listeners and
//! the foreground loop share stdout; interleaving with the prompt is
//! tolerated by design.

pub mod chart;

use colored::Colorize;
use std::io::Write;

use crate::backend::{ChatMessage, Delivery};
use crate::users::UserProfile;

/// Print the welcome banner
pub fn print_welcome(bot_name: &str) {
    println!();
    println!("\tHello! I'm your friendly {} chat client.", bot_name.bold());
    print_help();
}

/// Print the bang-command help
pub fn print_help() {
    println!("\tHere are the commands you can use:");
    println!("\t!help: List of commands");
    println!("\t!weather <city>: Weather update");
    println!("\t!fact: Random fact");
    println!("\t!whoami: Your user information");
    println!("\t!4: Send a message anonymously");
    println!("\t!stock: Get stock price from database and plot");
}

/// Print the numbered main menu
pub fn print_menu() {
    println!();
    println!("Options:");
    println!("1: Identify yourself");
    println!("2: Join a channel");
    println!("3: Leave a channel");
    println!("4: Send a message");
    println!("5: Get info about a user");
    println!("6: Exit");
    println!("7: Listen to multiple channels by pattern");
}

/// Print an inline prompt without a trailing newline
pub fn prompt(text: &str) {
    print!("{}", text);
    let _ = std::io::stdout().flush();
}

/// Print a message forwarded from a joined channel
pub fn print_channel_message(channel: &str, message: &ChatMessage) {
    println!(
        "Message from {}: {}: {}",
        channel.cyan(),
        message.username.bold(),
        message.message
    );
}

/// Print a message from a pattern feed
pub fn print_pattern_message(delivery: &Delivery) {
    print_channel_message(&delivery.channel, &delivery.message);
}

/// Print a channel's full history
pub fn print_history(channel: &str, records: &[ChatMessage]) {
    println!("Chat history for {}:", channel.cyan());
    for record in records {
        println!("{}: {}", record.username.bold(), record.message);
    }
}

/// Print a user profile
pub fn print_profile(profile: &UserProfile) {
    println!("User Name: {}", profile.user_name);
    println!("User Age: {}", profile.user_age);
    println!("User Gender: {}", profile.user_gender);
    println!("User Location: {}", profile.user_location);
}

/// Print the cached weather cities
pub fn print_cities(cities: &[String]) {
    if cities.is_empty() {
        println!("No cities available");
        return;
    }
    println!("Available cities in database:");
    for city in cities {
        println!("{}", city);
    }
}
