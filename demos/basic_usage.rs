//! Basic usage example for the mailinlet SMTP server
//!
//! Starts a server on an ephemeral port, talks to it with a hand-written
//! SMTP client and prints what the delivery hook received.

use mailinlet::{ChannelHook, ServerConfig, SmtpServer};
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("mailinlet Basic Usage Example");
    println!("=============================");

    let (tx, rx) = mpsc::channel();
    let server = SmtpServer::with_hooks(ServerConfig::new("example.local"), ChannelHook::new(tx));
    println!("Created SMTP server with domain: example.local");

    let listener = TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?.to_string();
    let running = server.clone();
    let server_thread = thread::spawn(move || {
        if let Err(e) = running.start_with_listener(listener) {
            eprintln!("Server error: {e}");
        }
    });
    println!("Server started on {addr}");

    println!("\nSending test email...");
    send_email(
        &addr,
        &["recipient@example.com"],
        &[
            "From: sender@example.com",
            "To: recipient@example.com",
            "Subject: Test Email from mailinlet",
            "",
            "This is a test email sent to demonstrate",
            "the mailinlet SMTP server.",
            "..and a line that needed dot-stuffing.",
        ],
    )?;

    println!("\nWaiting for email...");
    match rx.recv_timeout(Duration::from_secs(1)) {
        Ok(email) => {
            println!("Email received:");
            println!("  From: {}", email.sender);
            println!("  To: {}", email.recipient);
            println!("  Received at: {}", email.received_at);
            println!("  Subject: {:?}", email.subject());
            println!("  Body:");
            for line in email.body_text().unwrap_or_default().lines() {
                println!("    {line}");
            }
        }
        Err(_) => {
            eprintln!("Timeout: No email received within 1 second");
            return Ok(());
        }
    }

    println!("\nSending second test email to two recipients...");
    send_email(
        &addr,
        &["recipient@example.com", "another@example.com"],
        &[
            "Subject: Second Test Email",
            "",
            "This is the second test email with multiple recipients.",
        ],
    )?;

    let mut emails = Vec::new();
    while let Ok(email) = rx.recv_timeout(Duration::from_millis(200)) {
        emails.push(email);
    }
    println!("Collected {} more email(s)", emails.len());
    let from_sender = emails
        .iter()
        .filter(|email| email.is_from_sender("sender@example.com"))
        .count();
    println!("Emails from sender@example.com: {from_sender}");

    server.shutdown();
    let _ = server_thread.join();
    println!("\n{}", server.status());
    for (i, transcript) in server.transaction_log().iter().enumerate() {
        println!("\nTranscript {}:", i + 1);
        for line in transcript {
            println!("  {line}");
        }
    }
    Ok(())
}

fn send_email(
    addr: &str,
    recipients: &[&str],
    body: &[&str],
) -> Result<(), Box<dyn std::error::Error>> {
    let mut stream = TcpStream::connect(addr)?;
    let mut reader = BufReader::new(stream.try_clone()?);

    let read_reply = |reader: &mut BufReader<TcpStream>| -> std::io::Result<()> {
        loop {
            let mut line = String::new();
            reader.read_line(&mut line)?;
            print!("S: {line}");
            if line.as_bytes().get(3) != Some(&b'-') {
                return Ok(());
            }
        }
    };

    read_reply(&mut reader)?;
    write!(stream, "EHLO client.example.com\r\n")?;
    read_reply(&mut reader)?;
    write!(stream, "MAIL FROM:<sender@example.com>\r\n")?;
    read_reply(&mut reader)?;
    for recipient in recipients {
        write!(stream, "RCPT TO:<{recipient}>\r\n")?;
        read_reply(&mut reader)?;
    }
    write!(stream, "DATA\r\n")?;
    read_reply(&mut reader)?;

    for line in body {
        write!(stream, "{line}\r\n")?;
    }
    // End of data marker
    write!(stream, ".\r\n")?;
    read_reply(&mut reader)?;

    write!(stream, "QUIT\r\n")?;
    read_reply(&mut reader)?;
    Ok(())
}
