use anyhow::{Context, Result, anyhow};
use tokio::{
    io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
};
use tracing::{debug, info, warn};

use crate::{
    cli::ClientArgs,
    protocol::{
        ClientCommand, FrameReader, JoinResponse, MAX_FRAME_LEN, MAX_MESSAGE_LEN, ServerFrame,
        validate_username, write_frame,
    },
};

type ServerFrames = FrameReader<BufReader<OwnedReadHalf>>;

pub async fn run(args: ClientArgs) -> Result<()> {
    validate_username(&args.username).context("invalid username")?;

    let (mut frames, mut writer) = establish_connection(&args).await?;
    send_handshake(&mut writer, &args.username).await?;
    await_join_response(&mut frames).await?;
    write_stdout(&format!("*** connected as {}", args.username)).await?;

    let mut chat = ChatState::new(args.username);
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    run_client_loop(&mut frames, &mut writer, &mut stdin, &mut chat).await?;
    shutdown_connection(&mut writer).await;

    Ok(())
}

async fn establish_connection(args: &ClientArgs) -> Result<(ServerFrames, OwnedWriteHalf)> {
    let stream = TcpStream::connect(args.server.as_str())
        .await
        .with_context(|| format!("failed to connect to {}", args.server))?;

    info!("connected to {}", args.server);

    let (reader, writer) = stream.into_split();
    Ok((FrameReader::new(BufReader::new(reader), MAX_FRAME_LEN), writer))
}

async fn send_handshake(writer: &mut OwnedWriteHalf, username: &str) -> Result<()> {
    let join = ClientCommand::Join {
        username: username.to_string(),
    };
    write_frame(writer, &join.to_string()).await?;
    Ok(())
}

async fn await_join_response(frames: &mut ServerFrames) -> Result<()> {
    let frame = frames
        .next_frame()
        .await?
        .context("server closed the connection during the handshake")?;

    match ServerFrame::parse(&frame)? {
        ServerFrame::JoinResponse(JoinResponse::Ok) => Ok(()),
        ServerFrame::JoinResponse(JoinResponse::UsernameTaken) => {
            Err(anyhow!("that username is already in use"))
        }
        ServerFrame::JoinResponse(JoinResponse::UsernameInvalid) => {
            Err(anyhow!("the server rejected that username"))
        }
        ServerFrame::JoinResponse(JoinResponse::ServerFull) => {
            Err(anyhow!("the server is full, try again later"))
        }
        other => Err(anyhow!("unexpected handshake response: {other}")),
    }
}

async fn run_client_loop(
    frames: &mut ServerFrames,
    writer: &mut OwnedWriteHalf,
    stdin: &mut Lines<BufReader<Stdin>>,
    chat: &mut ChatState,
) -> Result<()> {
    loop {
        select! {
            server_frame = frames.next_frame() => {
                if !handle_server_frame(server_frame, chat).await? {
                    break;
                }
            }
            line = stdin.next_line() => {
                if !handle_stdin_input(line?, writer, chat).await? {
                    break;
                }
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                handle_ctrl_c(ctrl_c);
                break;
            }
        }
    }
    Ok(())
}

async fn handle_server_frame(frame: io::Result<Option<String>>, chat: &mut ChatState) -> Result<bool> {
    let Some(frame) = frame? else {
        write_stdout("*** server closed the connection").await?;
        return Ok(false);
    };

    match ServerFrame::parse(&frame) {
        Ok(frame) => {
            for line in chat.render(frame) {
                write_stdout(&line).await?;
            }
        }
        Err(err) => debug!(error = %err, %frame, "ignoring unreadable frame from server"),
    }
    Ok(true)
}

async fn handle_stdin_input(
    line: Option<String>,
    writer: &mut OwnedWriteHalf,
    chat: &ChatState,
) -> Result<bool> {
    let Some(line) = line else {
        return Ok(false);
    };

    match chat.interpret(&line) {
        Input::Nothing => {}
        Input::Send(command) => write_frame(writer, &command.to_string()).await?,
        Input::Print(text) => write_stdout(&text).await?,
        Input::Refuse(text) => write_stderr(&format!("!!! {text}")).await?,
        Input::Quit => {
            write_stdout("*** leaving chat").await?;
            return Ok(false);
        }
    }
    Ok(true)
}

fn handle_ctrl_c(result: io::Result<()>) {
    if let Err(error) = result {
        warn!(?error, "ctrl-c handler failed");
    }
}

async fn shutdown_connection(writer: &mut OwnedWriteHalf) {
    if let Err(error) = writer.shutdown().await {
        warn!(?error, "failed to shutdown client writer cleanly");
    }
}

/// What a line typed by the user turns into.
#[derive(Debug, PartialEq, Eq)]
enum Input {
    Nothing,
    Send(ClientCommand),
    Print(String),
    Refuse(String),
    Quit,
}

/// The client's view of the chat: who it is and who else is online.
struct ChatState {
    username: String,
    /// Everyone else in the last roster; `None` until the first one arrives.
    others: Option<Vec<String>>,
}

impl ChatState {
    fn new(username: String) -> Self {
        Self {
            username,
            others: None,
        }
    }

    fn render(&mut self, frame: ServerFrame) -> Vec<String> {
        match frame {
            ServerFrame::UserList { usernames } => self.apply_roster(usernames),
            ServerFrame::Shouted { sender, message } => vec![format!("{sender} said: {message}")],
            ServerFrame::ShoutedCc { message } => vec![format!("you said: {message}")],
            ServerFrame::Whispered { sender, message } => {
                vec![format!("{sender} @ you: {message}")]
            }
            ServerFrame::WhisperedCc { recipient, message } => {
                vec![format!("you @ {recipient}: {message}")]
            }
            ServerFrame::JoinResponse(response) => {
                debug!(?response, "ignoring join response after the handshake");
                Vec::new()
            }
        }
    }

    /// The wire roster includes this client; only the others are shown.
    fn apply_roster(&mut self, usernames: Vec<String>) -> Vec<String> {
        let others: Vec<String> = usernames
            .into_iter()
            .filter(|name| *name != self.username)
            .collect();

        let lines = match &self.others {
            None if others.is_empty() => Vec::new(),
            None => vec![format!("*** online: {}", others.join(", "))],
            Some(previous) => {
                let left = previous
                    .iter()
                    .filter(|name| !others.contains(name))
                    .map(|name| format!("*** {name} left the chat"));
                let joined = others
                    .iter()
                    .filter(|name| !previous.contains(name))
                    .map(|name| format!("*** {name} joined the chat"));
                left.chain(joined).collect()
            }
        };

        self.others = Some(others);
        lines
    }

    fn interpret(&self, line: &str) -> Input {
        let text = line.trim_end();
        if text.is_empty() {
            return Input::Nothing;
        }

        if text.eq_ignore_ascii_case("/quit") {
            return Input::Quit;
        }
        if text.eq_ignore_ascii_case("/who") {
            return Input::Print(self.describe_roster());
        }
        if let Some(rest) = text.strip_prefix("/w ") {
            return self.whisper(rest);
        }
        if text.starts_with('/') {
            return Input::Refuse(
                "unknown command; try /w <user> <message>, /who or /quit".to_string(),
            );
        }

        match check_length(text) {
            Some(refusal) => refusal,
            None => Input::Send(ClientCommand::Shout {
                message: text.to_string(),
            }),
        }
    }

    fn whisper(&self, rest: &str) -> Input {
        let Some((recipient, message)) = rest.trim_start().split_once(' ') else {
            return Input::Refuse("usage: /w <user> <message>".to_string());
        };
        if message.trim().is_empty() {
            return Input::Refuse("usage: /w <user> <message>".to_string());
        }
        if recipient == self.username {
            return Input::Refuse("you cannot whisper to yourself".to_string());
        }
        let online = self
            .others
            .as_ref()
            .is_some_and(|others| others.iter().any(|name| name == recipient));
        if !online {
            return Input::Refuse(format!("{recipient} is not online"));
        }

        match check_length(message) {
            Some(refusal) => refusal,
            None => Input::Send(ClientCommand::Whisper {
                recipient: recipient.to_string(),
                message: message.to_string(),
            }),
        }
    }

    fn describe_roster(&self) -> String {
        match &self.others {
            Some(others) if !others.is_empty() => format!("*** online: {}", others.join(", ")),
            _ => "*** nobody else is here".to_string(),
        }
    }
}

fn check_length(message: &str) -> Option<Input> {
    let len = message.chars().count();
    (len > MAX_MESSAGE_LEN).then(|| {
        Input::Refuse(format!(
            "message is {len} characters long, the limit is {MAX_MESSAGE_LEN}"
        ))
    })
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}

async fn write_stderr(line: &str) -> io::Result<()> {
    let mut stderr = tokio::io::stderr();
    stderr.write_all(line.as_bytes()).await?;
    stderr.write_all(b"\n").await?;
    stderr.flush().await
}
