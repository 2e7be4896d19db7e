use crossterm::event::{self, DisableMouseCapture, EnableMouseCapture};
use crossterm::execute;
use dma_toolkit::app::App;
use dma_toolkit::config::{config_path, data_dir};
use dma_toolkit::{logging, Config};
use dma_toolkit_agent::LocalAgent;
use std::io;
use std::sync::Arc;
use std::time::Duration;

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();

    match logging::init(&data_dir()) {
        Ok(path) => tracing::info!(path = %path.display(), "starting dma-toolkit"),
        Err(e) => eprintln!("dma-toolkit: file logging disabled: {e:#}"),
    }
    let config = Config::load_or_default(&config_path()).with_env();
    tracing::info!(port = config.agent.port, "configuration loaded");

    let rt = tokio::runtime::Runtime::new()?;
    // Tasks are spawned from the UI thread, so it needs the runtime context.
    let _guard = rt.enter();

    let backend = Arc::new(
        LocalAgent::new(config.runner_config())
            .with_chunk_size(config.flash.chunk_size)
            .with_tool_store(config.tool_store()),
    );
    let mut app = App::new(config, backend.clone());
    app.init();

    let mut terminal = ratatui::init();
    execute!(io::stdout(), EnableMouseCapture)?;

    let result = run(&mut terminal, &mut app);

    let _ = execute!(io::stdout(), DisableMouseCapture);
    ratatui::restore();

    app.session.reset();
    rt.block_on(backend.shutdown());
    result
}

fn run(terminal: &mut ratatui::DefaultTerminal, app: &mut App) -> color_eyre::Result<()> {
    loop {
        terminal.draw(|frame| app.render(frame))?;

        if event::poll(Duration::from_millis(50))? {
            let event = event::read()?;
            match app.handle_event(event) {
                Ok(true) => break,
                Ok(false) => {}
                Err(e) => tracing::warn!("event handling failed: {e:#}"),
            }
        }

        app.process_events();

        if app.should_quit {
            break;
        }
    }
    Ok(())
}
