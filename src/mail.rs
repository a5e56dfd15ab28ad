//! Mail emission and grandchild reaping (spec §4.7).
//!
//! Silence is the default: nothing is mailed unless the grandchild produced
//! at least one byte of output. `/usr/lib/sendmail` is invoked directly,
//! never through a shell, so a recipient address can't smuggle extra
//! command-line arguments into the transport.

use std::fs::File;
use std::io::{self, Read, Write};
use std::process::{Child, Command, Stdio};

use chrono::Local;

use crate::error::WorkerError;

/// Mail transport invocation (spec §6). Fixed at compile time rather than
/// discovered from the environment, per spec §9.
const SENDMAIL_PATH: &str = "/usr/lib/sendmail";
const SENDMAIL_ARGS: [&str; 5] = ["-Fgidget", "-odi", "-oem", "-oi", "-t"];

/// Fields needed to compose the mail headers (spec §4.7).
pub struct MailHeaders<'a> {
    pub account: &'a str,
    pub mail_to: &'a str,
    pub assembled_path: &'a str,
    pub watch_id: i32,
    pub mask_bits: u32,
    pub shell: &'a str,
    pub command: &'a str,
}

/// Outcome of reaping the grandchild, classified per spec §4.7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrandchildOutcome {
    Success,
    Ambiguous,
    Failed(i32),
    Unknown,
}

/// The seam between composing a message and actually delivering it. The
/// worker only ever uses [`Sendmail`]; tests substitute a stub that records
/// what it was given instead of shelling out, so the header/body format and
/// the invocation count (spec §8) can be asserted without a real
/// `/usr/lib/sendmail` on the test machine.
pub trait Transport {
    fn deliver(&self, message: &[u8]) -> io::Result<()>;
}

/// The real transport: spawns the mail transport binary and writes the
/// composed message to its standard input.
pub struct Sendmail;

impl Transport for Sendmail {
    fn deliver(&self, message: &[u8]) -> io::Result<()> {
        let mut child = Command::new(SENDMAIL_PATH)
            .args(SENDMAIL_ARGS)
            .stdin(Stdio::piped())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(message)?;
        }
        let _ = child.wait();
        Ok(())
    }
}

/// Reads the grandchild's captured output. Returns `None` if the first read
/// hit end-of-stream immediately — the documented "grandchild produced no
/// output" case, under which nothing is mailed (spec §4.7).
pub fn capture_output(pipe_read: &mut File) -> io::Result<Option<Vec<u8>>> {
    let mut first = [0u8; 1];
    if pipe_read.read(&mut first)? == 0 {
        return Ok(None);
    }

    let mut bytes = vec![first[0]];
    pipe_read.read_to_end(&mut bytes)?;
    Ok(Some(bytes))
}

/// Composes the header block and body into the exact bytes that go to the
/// mail transport's standard input (spec §4.7). The blank line separating
/// headers from body, and the `<shell> -c <command>:` body preamble, are
/// mandatory parts of the wire format and are reproduced exactly.
fn compose_message(headers: &MailHeaders, body: &[u8]) -> Vec<u8> {
    let preamble = format!(
        "From: {} (gidget)\nTo: {}\nSubject: gidget event: {}\nDate: {}\nAuto-Submitted: auto-generated\nX-gidget-object: {}\nX-gidget-watch: {}\nX-gidget-mask: {}\n\n{} -c {}:\n\n",
        headers.account,
        headers.mail_to,
        headers.assembled_path,
        Local::now().to_rfc2822(),
        headers.assembled_path,
        headers.watch_id,
        headers.mask_bits,
        headers.shell,
        headers.command,
    );
    let mut message = preamble.into_bytes();
    message.extend_from_slice(body);
    message
}

/// Delivers through the real mail transport (spec §4.7).
pub fn send(headers: &MailHeaders, body: &[u8]) -> Result<(), WorkerError> {
    send_via(&Sendmail, headers, body)
}

/// Delivers through an arbitrary [`Transport`] — the seam tests use to
/// stand in for a real `/usr/lib/sendmail`.
pub fn send_via(transport: &dyn Transport, headers: &MailHeaders, body: &[u8]) -> Result<(), WorkerError> {
    let message = compose_message(headers, body);
    transport.deliver(&message).map_err(WorkerError::Spawn)
}

/// Waits for the grandchild and classifies its low-order exit byte (spec
/// §4.7). Returns the status the worker itself should exit with.
pub fn wait_grandchild(mut child: Child) -> (i32, GrandchildOutcome) {
    match child.wait() {
        Ok(status) => match status.code() {
            Some(code) => {
                let low8 = code & 0xff;
                let outcome = match low8 {
                    127 => GrandchildOutcome::Ambiguous,
                    0 => GrandchildOutcome::Success,
                    other => GrandchildOutcome::Failed(other),
                };
                (low8, outcome)
            }
            None => (libc::EXIT_FAILURE, GrandchildOutcome::Unknown),
        },
        Err(_) => (libc::EXIT_FAILURE, GrandchildOutcome::Unknown),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn empty_pipe_yields_no_capture() {
        let (read_fd, write_fd) = nix::unistd::pipe().unwrap();
        drop(write_fd);
        let mut read_file = File::from(read_fd);
        let captured = capture_output(&mut read_file).unwrap();
        assert!(captured.is_none());
    }

    #[test]
    fn single_byte_then_eof_is_captured_in_full() {
        let (read_fd, write_fd) = nix::unistd::pipe().unwrap();
        let mut write_file = File::from(write_fd);
        write_file.write_all(b"hi").unwrap();
        drop(write_file);

        let mut read_file = File::from(read_fd);
        let captured = capture_output(&mut read_file).unwrap();
        assert_eq!(captured.as_deref(), Some(b"hi".as_slice()));
    }

    /// Records every message it was asked to deliver, instead of shelling
    /// out to a real transport (spec §8's "counting invocations of the
    /// stubbed transport").
    #[derive(Default)]
    struct RecordingTransport {
        messages: RefCell<Vec<Vec<u8>>>,
    }

    impl Transport for RecordingTransport {
        fn deliver(&self, message: &[u8]) -> io::Result<()> {
            self.messages.borrow_mut().push(message.to_vec());
            Ok(())
        }
    }

    fn test_headers<'a>(path: &'a str, command: &'a str) -> MailHeaders<'a> {
        MailHeaders {
            account: "nobody",
            mail_to: "ops@example.test",
            assembled_path: path,
            watch_id: 1,
            mask_bits: 0x100,
            shell: "/bin/sh",
            command,
        }
    }

    #[test]
    fn send_via_delivers_exactly_once_with_the_documented_wire_format() {
        let transport = RecordingTransport::default();
        let headers = test_headers("/tmp/inbox/a.txt", "/bin/echo hello '/tmp/inbox/a.txt' 0x00000100");
        send_via(&transport, &headers, b"hello\n").unwrap();

        let messages = transport.messages.borrow();
        assert_eq!(messages.len(), 1, "mail transport should be invoked exactly once");

        let message = String::from_utf8(messages[0].clone()).unwrap();
        let (head, rest) = message.split_once("\n\n").expect("headers must end with a blank line");
        assert!(head.starts_with("From: nobody (gidget)\n"));
        assert!(head.contains("To: ops@example.test\n"));
        assert!(head.contains("Subject: gidget event: /tmp/inbox/a.txt\n"));
        assert!(head.contains("X-gidget-watch: 1\n"));
        assert!(head.contains("X-gidget-mask: 256\n"));

        assert!(rest.starts_with("/bin/sh -c /bin/echo hello '/tmp/inbox/a.txt' 0x00000100:\n\n"));
        assert!(rest.ends_with("hello\n"));
    }

    #[test]
    fn silent_on_success_never_invokes_the_transport() {
        // Mirrors worker::run's own control flow: capture_output returning
        // `None` (grandchild produced no output) must short-circuit before
        // any `send`/`send_via` call is made.
        let transport = RecordingTransport::default();
        let (read_fd, write_fd) = nix::unistd::pipe().unwrap();
        drop(write_fd);
        let mut read_file = File::from(read_fd);

        if let Some(bytes) = capture_output(&mut read_file).unwrap() {
            let headers = test_headers("/tmp/inbox/a.txt", "/bin/echo hi");
            send_via(&transport, &headers, &bytes).unwrap();
        }

        assert!(transport.messages.borrow().is_empty());
    }
}
