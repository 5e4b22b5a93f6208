//! Small document-editor view-model wired to a command registry.
//!
//! Run with: `cargo run --example editor`
//!
//! Set `RUST_LOG=command_aggregator=trace` to watch registrations and
//! dispatches.

use std::sync::{Arc, Mutex};

use command_aggregator::{
    Command, CommandRegistry, ConfigError, DependencyDeclarations, RelayCommand, ViewModel,
    ViewModelBase,
};
use serde_json::{Value, json};
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// Editor view-model
// ---------------------------------------------------------------------------

/// Text buffer shared between the view-model and its commands.
#[derive(Debug, Default)]
struct Buffer {
    saved: String,
    dirty: bool,
}

struct EditorVm {
    base: ViewModelBase,
    text: String,
    buffer: Arc<Mutex<Buffer>>,
    save_command: Arc<RelayCommand>,
}

impl ViewModel for EditorVm {
    const DEPENDENCIES: DependencyDeclarations = &[
        ("Title", &["FileName", "IsDirty"]),
        ("WordCount", &["Text"]),
        ("IsDirty", &["Text"]),
    ];

    fn base(&self) -> &ViewModelBase {
        &self.base
    }

    fn init_commands(&self, commands: &dyn CommandRegistry) {
        commands.add_or_set_command_with_settings(
            "Save",
            self.save_command.clone(),
            [
                ("Label".to_owned(), json!("Save")),
                ("Shortcut".to_owned(), json!("Ctrl+S")),
            ]
            .into(),
        );
        commands.add_or_set_command(
            "Close",
            Arc::new(RelayCommand::new(|_| println!("  close requested"))),
        );
    }
}

impl EditorVm {
    fn new() -> Result<Self, ConfigError> {
        let buffer = Arc::new(Mutex::new(Buffer::default()));
        let (for_save, for_guard) = (Arc::clone(&buffer), Arc::clone(&buffer));
        let save_command = RelayCommand::builder()
            .execute(move |p: &Value| {
                let Ok(mut buffer) = for_save.lock() else { return };
                if let Some(text) = p.as_str() {
                    buffer.saved = text.to_owned();
                }
                buffer.dirty = false;
            })
            .can_execute(move |_: &Value| {
                for_guard.lock().map(|b| b.dirty).unwrap_or(false)
            })
            .post_hook(|| println!("  saved"))
            .build()?;

        Ok(Self {
            base: ViewModelBase::new::<Self>(),
            text: String::new(),
            buffer,
            save_command: Arc::new(save_command),
        }
        .initialized())
    }

    fn set_text(&mut self, text: &str) {
        if self.base.set_field(&mut self.text, text.to_owned(), "Text") {
            if let Ok(mut buffer) = self.buffer.lock() {
                buffer.dirty = true;
            }
            self.save_command.raise_can_execute_changed();
        }
    }

    fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut editor = EditorVm::new()?;
    editor.base.subscribe(|e| println!("  changed: {}", e.property));
    editor.base.set_value("FileName", "notes.txt".to_string());

    println!("typing...");
    editor.set_text("hello command registry");
    println!("word count = {}", editor.word_count());

    let save = editor.commands().get("Save");
    println!(
        "{} ({}) enabled = {}",
        save.get("Label").unwrap_or(Value::Null),
        save.get("Shortcut").unwrap_or(Value::Null),
        save.command().can_execute(&Value::Null),
    );

    println!("saving on a worker...");
    editor
        .commands()
        .execute_async("Save", Value::from(editor.text.clone()))
        .await?;
    println!(
        "enabled after save = {}",
        save.command().can_execute(&Value::Null)
    );
    if let Ok(buffer) = editor.buffer.lock() {
        println!("saved text = {:?}", buffer.saved);
    }

    editor.commands().execute_async("Close", Value::Null).await?;
    editor.base.set_window_result(Some(true));
    println!("window result = {:?}", editor.base.window_result());

    editor.base.teardown();
    println!("commands left = {}", editor.commands().count());
    Ok(())
}
