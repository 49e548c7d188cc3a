//! Terminal client: generate a question set on a running backend, take the
//! timed exam on stdin, then review the results and ask for explanations.

use std::time::Duration;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

use edutest::client::ApiClient;
use edutest::config::{ExamTiming, Prompts};
use edutest::domain::QuestionSet;
use edutest::error::SessionError;
use edutest::explain::{answer_follow_up, explain_question, ExplanationLog};
use edutest::questions::{canonical_topic, QuestionRequest, DEFAULT_COUNT, DEFAULT_SUBJECT, DEFAULT_TOPIC};
use edutest::resolver::BackendResolver;
use edutest::session::{ExamSession, Outcome, SessionPhase};
use edutest::telemetry;

type Input = Lines<BufReader<Stdin>>;

#[derive(Parser, Debug)]
#[command(version, about = "Take a timed practice exam against an edutest backend", long_about = None)]
struct Args {
  /// Exam the questions are written for
  #[arg(short, long, default_value = DEFAULT_SUBJECT)]
  exam: String,

  /// Topic; free text such as "modern history" is mapped onto a known topic
  #[arg(short, long)]
  topic: Option<String>,

  /// Number of questions to generate
  #[arg(short, long, default_value_t = DEFAULT_COUNT)]
  count: u32,

  /// Exam length in minutes (default depends on the number of questions)
  #[arg(short, long)]
  minutes: Option<u32>,

  /// Backend base URL; repeat to give fallbacks. Defaults to EDUTEST_API_URL,
  /// then localhost:5001 and localhost:5000
  #[arg(long = "api")]
  api: Vec<String>,
}

#[derive(Debug, PartialEq, Eq)]
enum ExamCommand {
  Select(usize),
  Next,
  Previous,
  Goto(usize),
  Time,
  Submit,
  Help,
}

#[derive(Debug, PartialEq, Eq)]
enum ReviewCommand {
  Explain(usize),
  FollowUp(usize, String),
  Show,
  Quit,
  Help,
}

/// Parse one line typed during the exam. Question numbers are 1-based.
fn parse_exam_command(line: &str) -> Option<ExamCommand> {
  let line = line.trim().to_lowercase();
  let mut parts = line.split_whitespace();
  let head = parts.next()?;
  let cmd = match head {
    "1" | "2" | "3" | "4" => ExamCommand::Select(head.parse::<usize>().ok()? - 1),
    "a" | "b" | "c" | "d" => ExamCommand::Select((head.as_bytes()[0] - b'a') as usize),
    "n" | "next" => ExamCommand::Next,
    "p" | "prev" => ExamCommand::Previous,
    "g" | "goto" => ExamCommand::Goto(parts.next()?.parse::<usize>().ok()?.checked_sub(1)?),
    "t" | "time" => ExamCommand::Time,
    "s" | "submit" => ExamCommand::Submit,
    "h" | "help" | "?" => ExamCommand::Help,
    _ => return None,
  };
  Some(cmd)
}

fn parse_review_command(line: &str) -> Option<ReviewCommand> {
  let trimmed = line.trim();
  let (head, rest) = trimmed.split_once(char::is_whitespace).unwrap_or((trimmed, ""));
  let rest = rest.trim();
  let cmd = match head.to_lowercase().as_str() {
    "e" | "explain" => ReviewCommand::Explain(rest.parse::<usize>().ok()?.checked_sub(1)?),
    "f" | "followup" => {
      let (num, text) = rest.split_once(char::is_whitespace)?;
      let text = text.trim();
      if text.is_empty() {
        return None;
      }
      ReviewCommand::FollowUp(num.parse::<usize>().ok()?.checked_sub(1)?, text.to_string())
    }
    "r" | "review" => ReviewCommand::Show,
    "q" | "quit" => ReviewCommand::Quit,
    "h" | "help" | "?" => ReviewCommand::Help,
    _ => return None,
  };
  Some(cmd)
}

#[tokio::main]
async fn main() {
  dotenvy::dotenv().ok();
  telemetry::init_tracing(telemetry::CLI_DEFAULT_FILTER);
  let args = Args::parse();

  if let Err(e) = run(args).await {
    eprintln!("Error: {}", e);
    std::process::exit(1);
  }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
  let mut candidates = args.api.clone();
  if candidates.is_empty() {
    if let Ok(url) = std::env::var("EDUTEST_API_URL") {
      candidates.push(url);
    }
    candidates.extend(edutest::resolver::DEFAULT_CANDIDATES.iter().map(|s| s.to_string()));
  }
  let resolver = BackendResolver::new(candidates);
  let client = ApiClient::new(resolver.resolve().await);
  println!("Using backend {}", client.base_url());

  let topic = args
    .topic
    .as_deref()
    .map(canonical_topic)
    .filter(|t| !t.is_empty())
    .unwrap_or_else(|| DEFAULT_TOPIC.to_string());
  let req = QuestionRequest { subject: args.exam.trim().to_string(), topic, count: args.count };
  req.validate()?;
  let requested_secs = requested_duration(args.minutes)?;

  let mut input = BufReader::new(tokio::io::stdin()).lines();

  let Some(set) = fetch_with_retry(&client, &req, &mut input).await? else {
    return Ok(());
  };
  let duration = requested_secs.unwrap_or_else(|| ExamTiming::default().duration_for(set.len()));

  let mut session = ExamSession::new();
  session.start(set, duration)?;
  println!(
    "\n{} {}: {} questions, {} on the clock. Type 'h' for help.",
    req.subject,
    req.topic,
    session.len(),
    session.remaining_display()
  );
  print_current(&session);

  take_exam(&mut session, &mut input).await?;
  print_results(&session)?;
  review(&session, &client, &mut input).await
}

/// `--minutes` in seconds. Zero is refused before any question is generated.
fn requested_duration(minutes: Option<u32>) -> Result<Option<u32>, SessionError> {
  match minutes {
    Some(0) => Err(SessionError::ZeroDuration),
    Some(m) => Ok(Some(m.saturating_mul(60))),
    None => Ok(None),
  }
}

async fn fetch_with_retry(
  client: &ApiClient,
  req: &QuestionRequest,
  input: &mut Input,
) -> Result<Option<QuestionSet>, Box<dyn std::error::Error>> {
  loop {
    println!("Generating {} questions on {}...", req.count, req.topic);
    match client.fetch_questions(req).await {
      Ok(set) => return Ok(Some(set)),
      Err(e) if e.is_retryable() => {
        println!("Failed to generate questions: {}", e);
        println!("Try again? [Y/n]");
        match input.next_line().await? {
          Some(answer) if answer.trim().eq_ignore_ascii_case("n") => return Ok(None),
          Some(_) => continue,
          None => return Ok(None),
        }
      }
      Err(e) => return Err(e.into()),
    }
  }
}

/// Drive the session until it is submitted or the clock runs out.
async fn take_exam(session: &mut ExamSession, input: &mut Input) -> Result<(), Box<dyn std::error::Error>> {
  let second = Duration::from_secs(1);
  let mut ticker = interval_at(Instant::now() + second, second);
  ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

  while session.is_in_progress() {
    tokio::select! {
      _ = ticker.tick() => {
        if session.tick()? == SessionPhase::Finished {
          println!("\nTime is up! Your answers have been submitted.");
        } else if session.remaining() % 300 == 0 || session.remaining() == 60 || session.remaining() <= 10 {
          println!("[{} left]", session.remaining_display());
        }
      }
      line = input.next_line() => {
        let Some(line) = line? else {
          session.finish()?;
          break;
        };
        on_exam_line(session, &line)?;
      }
    }
  }
  Ok(())
}

fn on_exam_line(session: &mut ExamSession, line: &str) -> Result<(), Box<dyn std::error::Error>> {
  let current = session.current_index();
  let outcome = match parse_exam_command(line) {
    Some(ExamCommand::Select(option)) => session.select_answer(current, option).map(|_| {
      if current + 1 < session.len() {
        if let Err(e) = session.navigate(current + 1) {
          debug!(target: "session", error = %e, "Staying on the current question");
        }
      }
      print_current(session);
    }),
    Some(ExamCommand::Next) => session.navigate(current + 1).map(|_| print_current(session)),
    Some(ExamCommand::Previous) => match current.checked_sub(1) {
      Some(prev) => session.navigate(prev).map(|_| print_current(session)),
      None => {
        println!("Already at the first question.");
        Ok(())
      }
    },
    Some(ExamCommand::Goto(index)) => session.navigate(index).map(|_| print_current(session)),
    Some(ExamCommand::Time) => {
      println!(
        "{} left, {}/{} answered",
        session.remaining_display(),
        session.answered_count(),
        session.len()
      );
      Ok(())
    }
    Some(ExamCommand::Submit) => session.finish(),
    Some(ExamCommand::Help) => {
      println!("1-4 or a-d: answer   n/p: next/previous   g N: go to question N   t: time   s: submit");
      Ok(())
    }
    None => {
      println!("Unknown command, type 'h' for help.");
      Ok(())
    }
  };

  if let Err(e) = outcome {
    println!("{}", e);
  }
  Ok(())
}

fn print_current(session: &ExamSession) {
  let index = session.current_index();
  let Some(q) = session.current_question() else { return };
  let selected = session.selected(index);
  println!("\nQuestion {} of {}  [{} left]", index + 1, session.len(), session.remaining_display());
  println!("{}", q.question);
  for (i, option) in q.options.iter().enumerate() {
    let mark = if selected == Some(i as u8) { '*' } else { ' ' };
    println!(" {}{}. {}", mark, i + 1, option);
  }
}

fn print_results(session: &ExamSession) -> Result<(), Box<dyn std::error::Error>> {
  let score = session.score()?;
  println!("\nTest results");
  println!(
    "Score: {}/{} ({:.0}%)  correct {}  incorrect {}",
    score.correct,
    score.total,
    score.percentage(),
    score.correct,
    score.incorrect()
  );
  print_review(session)
}

fn print_review(session: &ExamSession) -> Result<(), Box<dyn std::error::Error>> {
  for item in session.review()? {
    let mark = match item.outcome {
      Outcome::Correct => "correct",
      Outcome::Incorrect => "incorrect",
      Outcome::Unanswered => "unanswered",
    };
    println!("\nQ{}. {} ({})", item.ordinal, item.question, mark);
    println!("  Your answer: {}", item.your_answer());
    println!("  Correct answer: {}", item.correct_text);
  }
  println!("\n'e N' explains question N, 'f N text' asks a follow-up, 'q' quits.");
  Ok(())
}

async fn review(session: &ExamSession, client: &ApiClient, input: &mut Input) -> Result<(), Box<dyn std::error::Error>> {
  let prompts = Prompts::default();
  let mut log = ExplanationLog::new();

  while let Some(line) = input.next_line().await? {
    let cmd = match parse_review_command(&line) {
      Some(cmd) => cmd,
      None => {
        println!("Unknown command, type 'h' for help.");
        continue;
      }
    };

    let (index, follow_up) = match cmd {
      ReviewCommand::Quit => break,
      ReviewCommand::Show => {
        print_review(session)?;
        continue;
      }
      ReviewCommand::Help => {
        println!("e N: explain question N   f N text: follow-up on question N   r: review   q: quit");
        continue;
      }
      ReviewCommand::Explain(index) => (index, None),
      ReviewCommand::FollowUp(index, text) => (index, Some(text)),
    };

    let Some(question) = session.question(index) else {
      println!("There is no question {}.", index + 1);
      continue;
    };

    let result = match follow_up {
      None => {
        if let Some(text) = log.text(question.id) {
          println!("\n{}", text);
          continue;
        }
        log.begin(question.id);
        println!("Loading explanation...");
        explain_question(client, &prompts, question, session.selected(index))
          .await
          .map(|text| log.complete(question.id, text).to_string())
      }
      Some(text) => {
        let Some(prior) = log.text(question.id).map(str::to_string) else {
          println!("Ask for the explanation first: e {}", index + 1);
          continue;
        };
        log.begin(question.id);
        println!("Thinking...");
        answer_follow_up(client, &prompts, question, &prior, &text)
          .await
          .map(|answer| log.append_follow_up(question.id, &answer).to_string())
      }
    };

    match result {
      Ok(text) => println!("\n{}", text),
      Err(e) => {
        log.abandon(question.id);
        println!("{}", e);
      }
    }
  }
  Ok(())
}
