// ABOUTME: Per-room votings: !startvote opens one, !vote shows or casts/edits a vote, !endvote tallies it.
// ABOUTME: A running voting is kept in memory and persisted to one JSON file per room.

use anyhow::{Context, Result};
use async_trait::async_trait;
use horscht_core::{Bot, CommandCall, CommandHandler, Plugin, PluginConfig, RegistryError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha224};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

const DEFAULT_DIR: &str = ".";
const NO_VOTING: &str = "There is no running voting, use !startvote to create one.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Single,
    #[default]
    Multi,
}

pub fn plugin(config: PluginConfig) -> Result<Plugin, RegistryError> {
    let mode = match config.str("mode") {
        None | Some("multi") => Mode::Multi,
        Some("single") => Mode::Single,
        Some(other) => {
            return Err(RegistryError::InvalidParameter {
                plugin: config.plugin().to_string(),
                key: "mode".to_string(),
                reason: format!("expected \"single\" or \"multi\", got {other:?}"),
            })
        }
    };
    let votings = Arc::new(Votings::new(config.str_or("dir", DEFAULT_DIR)));

    Ok(Plugin::new(config)
        .command(
            "!startvote",
            "Start a voting: !startvote <question> <answer> [answer...] (escape spaces with a backslash)",
            StartVote {
                votings: Arc::clone(&votings),
                mode,
            },
        )
        .command(
            "!vote",
            "Show the running voting, or vote: !vote <answer>[, answer...] (append \"edit\" to change your vote)",
            CastVote {
                votings: Arc::clone(&votings),
            },
        )
        .command(
            "!endvote",
            "End the running voting and show the results (!endvote yes)",
            EndVote { votings },
        ))
}

/// One running voting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voting {
    pub room: String,
    pub question: String,
    pub answers: Vec<String>,
    /// Hashed voter id -> chosen answers
    pub votes: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub mode: Mode,
}

impl Voting {
    pub fn new(room: impl Into<String>, question: impl Into<String>, answers: Vec<String>, mode: Mode) -> Self {
        Self {
            room: room.into(),
            question: question.into(),
            answers,
            votes: BTreeMap::new(),
            mode,
        }
    }

    /// Cast or edit `voter`'s vote. `Err` carries the reply explaining the refusal.
    pub fn vote(&mut self, voter: &str, choice: &str) -> Result<(), String> {
        if self.mode == Mode::Single && choice.contains(',') {
            return Err("You can only vote for one option here.".to_string());
        }
        let choice = choice.trim();
        let (choice, edit) = match choice.strip_suffix(" edit") {
            Some(rest) => (rest.trim(), true),
            None => (choice, false),
        };
        if let Some(existing) = self.votes.get(voter) {
            if !edit {
                return Err(format!(
                    "You already voted {}. Type \"!vote {choice} edit\" to change your vote to {choice}.",
                    existing.join(", ")
                ));
            }
        }

        let choices: Vec<String> = choice.split(',').map(|c| c.trim().to_string()).collect();
        if let Some(invalid) = choices.iter().find(|c| !self.answers.contains(c)) {
            return Err(format!(
                "{invalid} is not a valid choice. Type !vote without anything to see the options."
            ));
        }
        self.votes.insert(voter.to_string(), choices);
        Ok(())
    }

    /// Number of voters
    pub fn total_votes(&self) -> usize {
        self.votes.len()
    }

    /// Number of votes for `answer`
    pub fn results_total(&self, answer: &str) -> usize {
        self.votes
            .values()
            .flatten()
            .filter(|vote| *vote == answer)
            .count()
    }

    fn overview(&self) -> String {
        let mut reply = format!("Question: {}\nPossible answers:\n", self.question);
        for answer in &self.answers {
            reply.push_str(&format!("    {answer}\n"));
        }
        if self.mode == Mode::Multi {
            reply.push_str(
                "You can vote for multiple options, by comma separating them like: !vote option1, option2",
            );
        }
        reply
    }

    fn results(&self) -> String {
        let mut reply = format!(
            "I hereby present you the results for the vote on \"{}\" ({} voters):\n",
            self.question,
            self.total_votes()
        );
        for answer in &self.answers {
            reply.push_str(&format!("    {answer}: {} Votes\n", self.results_total(answer)));
        }
        reply.push_str("Thanks for using me, cu next time! :)");
        reply
    }
}

/// SHA-224 hex key, so neither file names nor vote records carry raw ids.
fn key(id: &str) -> String {
    hex::encode(Sha224::digest(id.as_bytes()))
}

/// Votings by room key, loaded lazily from `voting_<room key>.json` files.
#[derive(Debug)]
struct Votings {
    dir: PathBuf,
    cache: Mutex<HashMap<String, Voting>>,
}

impl Votings {
    fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn path(&self, room: &str) -> PathBuf {
        self.dir.join(format!("voting_{room}.json"))
    }

    fn current(&self, room: &str) -> Result<Option<Voting>> {
        if let Some(voting) = self.cache.lock().get(room) {
            return Ok(Some(voting.clone()));
        }
        let path = self.path(room);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
        };
        if content.trim().is_empty() {
            return Ok(None);
        }
        let voting: Voting = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        self.cache.lock().insert(room.to_string(), voting.clone());
        Ok(Some(voting))
    }

    fn save(&self, voting: Voting) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;
        let path = self.path(&voting.room);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string(&voting)?)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to replace {}", path.display()))?;
        self.cache.lock().insert(voting.room.clone(), voting);
        Ok(())
    }

    fn remove(&self, room: &str) -> Result<()> {
        self.cache.lock().remove(room);
        let path = self.path(room);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
        }
    }
}

/// Re-join words the router split at backslash-escaped whitespace.
fn unescape_words(args: &[String]) -> Vec<String> {
    let mut words = Vec::new();
    let mut pending: Option<String> = None;
    for arg in args {
        let mut word = pending.take().unwrap_or_default();
        if !word.is_empty() {
            word.push(' ');
        }
        match arg.strip_suffix('\\') {
            Some(stem) => {
                word.push_str(stem);
                pending = Some(word);
            }
            None => {
                word.push_str(arg);
                words.push(word);
            }
        }
    }
    words.extend(pending);
    words
}

struct StartVote {
    votings: Arc<Votings>,
    mode: Mode,
}

#[async_trait]
impl CommandHandler for StartVote {
    async fn handle(&self, bot: &Bot, call: CommandCall<'_>) -> Result<()> {
        let room = key(&call.event.room_id);
        if self.votings.current(&room)?.is_some() {
            return bot
                .reply(
                    call.event,
                    "There is already a voting in progress, use !endvote to end that first.",
                )
                .await;
        }
        let words = unescape_words(call.args);
        let [question, answers @ ..] = words.as_slice() else {
            return bot.reply(call.event, NOT_ENOUGH).await;
        };
        if answers.is_empty() {
            return bot.reply(call.event, NOT_ENOUGH).await;
        }

        let voting = Voting::new(room, question.clone(), answers.to_vec(), self.mode);
        let overview = voting.overview();
        self.votings.save(voting)?;
        tracing::info!(room_id = %call.event.room_id, question = %question, answers = answers.len(), "Voting started");
        bot.reply(call.event, &format!("Voting started.\n{overview}")).await
    }
}

const NOT_ENOUGH: &str = "Not enough arguments. We need a question and at least one answer to start things. \
Please use backslashes to escape whitespace!";

struct CastVote {
    votings: Arc<Votings>,
}

#[async_trait]
impl CommandHandler for CastVote {
    async fn handle(&self, bot: &Bot, call: CommandCall<'_>) -> Result<()> {
        let room = key(&call.event.room_id);
        let Some(mut voting) = self.votings.current(&room)? else {
            return bot.reply(call.event, NO_VOTING).await;
        };
        let choice = call.args.join(" ");
        if choice.is_empty() {
            return bot.reply(call.event, &voting.overview()).await;
        }

        match voting.vote(&key(&call.event.sender), &choice) {
            Ok(()) => {
                self.votings.save(voting)?;
                bot.reply(call.event, "Your vote has been counted.").await
            }
            Err(refusal) => bot.reply(call.event, &refusal).await,
        }
    }
}

struct EndVote {
    votings: Arc<Votings>,
}

#[async_trait]
impl CommandHandler for EndVote {
    async fn handle(&self, bot: &Bot, call: CommandCall<'_>) -> Result<()> {
        let room = key(&call.event.room_id);
        let Some(voting) = self.votings.current(&room)? else {
            return bot.reply(call.event, NO_VOTING).await;
        };
        if !call.args.iter().any(|a| a.eq_ignore_ascii_case("yes")) {
            return bot
                .reply(
                    call.event,
                    "Are you sure you want to end the vote and display results? (!endvote yes to continue)",
                )
                .await;
        }

        self.votings.remove(&room)?;
        tracing::info!(room_id = %call.event.room_id, voters = voting.total_votes(), "Voting ended");
        bot.reply(call.event, &voting.results()).await
    }
}
