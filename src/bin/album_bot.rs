//! Photo album bot on a console transport
//!
//! Each stdin line is a message in one private chat. `photo:<file_id>`
//! sends a photo instead of text. Replies go to stdout, logs to stderr.
//!
//! ```text
//! CHATMUX_STORE=file:./album-state cargo run --bin album_bot
//! ```

use async_trait::async_trait;
use chatmux::{
    ActionError, Config, ConversationHandler, Event, EventSource, MutationContext, Mux, Predicate,
    SimpleHandler, Transition,
};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const CONSOLE_CHAT_ID: i64 = 1;

const GREETING: &str = "Hello! I'm a gallery bot.\n\n\
    I allow users to upload & share their photos!\n\n\
    Available commands:\n/add - add photo\n/list - list photos";

// ============================================================================
// Application state
// ============================================================================

#[derive(Debug, Clone)]
struct Photo {
    id: u64,
    file_id: String,
    description: String,
}

/// Submitted photos; owned by the bot, not by the engine
#[derive(Debug, Default)]
struct Catalog {
    last_id: u64,
    photos: Vec<Photo>,
}

impl Catalog {
    fn add(&mut self, file_id: String, description: String) -> u64 {
        self.last_id += 1;
        self.photos.push(Photo {
            id: self.last_id,
            file_id,
            description,
        });
        self.last_id
    }

    fn get(&self, id: u64) -> Option<&Photo> {
        self.photos.iter().find(|p| p.id == id)
    }
}

type SharedCatalog = Arc<Mutex<Catalog>>;

fn with_catalog<T>(
    catalog: &SharedCatalog,
    f: impl FnOnce(&mut Catalog) -> T,
) -> Result<T, ActionError> {
    let mut guard = catalog
        .lock()
        .map_err(|_| ActionError::new("photo catalog lock poisoned"))?;
    Ok(f(&mut guard))
}

// ============================================================================
// Console transport
// ============================================================================

/// Outbound side: prints what a chat transport would send
#[derive(Debug, Clone, Copy)]
struct Outbox;

impl Outbox {
    fn send(self, event: &Event, text: &str) {
        println!("[chat {}] {text}", event.chat.id);
    }

    fn send_photo(self, event: &Event, file_id: &str, caption: &str) {
        println!("[chat {}] <photo {file_id}> {caption}", event.chat.id);
    }
}

/// Inbound side: one event per non-empty stdin line
struct ConsoleSource {
    lines: Lines<BufReader<Stdin>>,
    next_update_id: i64,
}

impl ConsoleSource {
    fn new() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
            next_update_id: 1,
        }
    }

    fn parse(&mut self, line: &str) -> Event {
        let event = match line.strip_prefix("photo:") {
            Some(file_id) => Event::photo(CONSOLE_CHAT_ID, file_id.trim()),
            None => Event::text(CONSOLE_CHAT_ID, line),
        };
        let update_id = self.next_update_id;
        self.next_update_id += 1;
        event.with_update_id(update_id).with_message_id(update_id)
    }
}

#[async_trait]
impl EventSource for ConsoleSource {
    async fn next_event(&mut self) -> Option<Event> {
        loop {
            // `next_line` is cancel safe, so a pending read survives shutdown polling
            match self.lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if !line.is_empty() {
                        return Some(self.parse(line));
                    }
                }
                Ok(None) => return None,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to read stdin");
                    return None;
                }
            }
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

fn album_dialog(
    store: Arc<dyn chatmux::ConversationStore>,
    catalog: &SharedCatalog,
    outbox: Outbox,
) -> ConversationHandler {
    let not_cancel = || !Predicate::command("cancel");

    let start = Transition::new(Predicate::command("add"), move |event, ctx| {
        outbox.send(event, "Please send me your photo.");
        ctx.set_state("upload_photo");
        Ok(())
    });

    let receive_photo = Transition::new(Predicate::has_photo(), move |event, ctx| {
        let file_id = event
            .media()
            .and_then(|m| m.file_ids.first())
            .ok_or_else(|| ActionError::new("photo message without a file id"))?;
        ctx.data_mut().insert("photoID", file_id.as_str());
        outbox.send(event, "Please enter photo description.");
        ctx.set_state("enter_description");
        Ok(())
    });
    let photo_reprompt = Transition::new(not_cancel(), move |event, _| {
        outbox.send(event, "Sorry, I only accept photos. Please try again!");
        Ok(())
    });

    let receive_description = Transition::new(Predicate::has_text(), move |event, ctx| {
        let text = event.message_text().unwrap_or_default();
        ctx.data_mut().insert("photoDescription", text);
        outbox.send(event, "Are you sure you want to save this photo? (Yes/No)");
        ctx.set_state("confirm_submission");
        Ok(())
    });
    let description_reprompt = Transition::new(not_cancel(), move |event, _| {
        outbox.send(event, "Sorry, I did not understand that. Please enter some text!");
        Ok(())
    });

    let confirm = {
        let catalog = catalog.clone();
        Transition::new(Predicate::has_text(), move |event, ctx| {
            confirm_submission(&catalog, outbox, event, ctx)
        })
    };

    let cancel = Transition::new(Predicate::command("cancel"), move |event, ctx| {
        ctx.finish();
        outbox.send(event, "Cancelled.");
        Ok(())
    });

    ConversationHandler::builder("upload_photo_dialog", store)
        .state("", [start])
        .state("upload_photo", [receive_photo, photo_reprompt])
        .state("enter_description", [receive_description, description_reprompt])
        .state("confirm_submission", [confirm])
        .fallback(cancel)
        .build()
}

fn confirm_submission(
    catalog: &SharedCatalog,
    outbox: Outbox,
    event: &Event,
    ctx: &mut MutationContext,
) -> Result<(), ActionError> {
    if event.message_text() == Some("Yes") {
        let file_id = ctx.data().get_str("photoID")?.to_string();
        let description = ctx.data().get_str("photoDescription")?.to_string();
        let id = with_catalog(catalog, |c| c.add(file_id, description))?;
        tracing::info!(photo_id = id, "Photo submitted");
        outbox.send(event, "Photo submitted! Type /list to list all photos.");
    } else {
        outbox.send(event, "Cancelled.");
    }
    ctx.finish();
    Ok(())
}

fn list_photos(catalog: &SharedCatalog, outbox: Outbox) -> SimpleHandler {
    let catalog = catalog.clone();
    SimpleHandler::new("list", Predicate::command("list"), move |event| {
        let lines = with_catalog(&catalog, |c| {
            c.photos
                .iter()
                .map(|p| format!("- {} (/view_{})", p.description, p.id))
                .collect::<Vec<_>>()
        })?;
        let body = if lines.is_empty() {
            "No photos yet.".to_string()
        } else {
            lines.join("\n")
        };
        outbox.send(event, &format!("Photos:\n{body}"));
        Ok(())
    })
}

fn view_photo(catalog: &SharedCatalog, outbox: Outbox) -> Result<SimpleHandler, regex::Error> {
    let catalog = catalog.clone();
    let predicate = Predicate::regex(r"^/view_(\d+)$")?;
    Ok(SimpleHandler::new("view", predicate, move |event| {
        let id = event
            .raw_text()
            .and_then(|text| text.strip_prefix("/view_"))
            .and_then(|n| n.parse::<u64>().ok());
        let photo = with_catalog(&catalog, |c| id.and_then(|id| c.get(id).cloned()))?;
        match photo {
            Some(photo) => outbox.send_photo(
                event,
                &photo.file_id,
                &format!("Description: {}", photo.description),
            ),
            None => outbox.send(event, "Photo not found!"),
        }
        Ok(())
    }))
}

fn greeting(outbox: Outbox) -> SimpleHandler {
    SimpleHandler::new("greeting", Predicate::any(), move |event| {
        outbox.send(event, GREETING);
        Ok(())
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chatmux=info,album_bot=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config = Config::from_env()?;
    tracing::info!(
        store = ?config.store,
        max_in_flight = config.max_in_flight,
        "Starting album bot"
    );
    let store = config.store.open().await?;

    let catalog = SharedCatalog::default();
    let outbox = Outbox;
    let mux = Mux::new()
        .with_handler(album_dialog(store, &catalog, outbox))
        .with_handler(list_photos(&catalog, outbox))
        .with_handler(view_photo(&catalog, outbox)?)
        .with_handler(greeting(outbox));

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupt received");
                shutdown.cancel();
            }
        });
    }

    let runner = chatmux::Runner::new(Arc::new(mux)).with_max_in_flight(config.max_in_flight);
    let stats = runner.run(ConsoleSource::new(), shutdown).await;
    tracing::info!(
        claimed = stats.claimed,
        dropped = stats.dropped,
        failed = stats.failed,
        "Album bot stopped"
    );
    Ok(())
}
