//! Main window hosting the chat UI. Closing it shuts the backend down.

use crate::shell::Shell;
use anyhow::{Context, Result};
use services::UiSource;
use tao::event::{Event, WindowEvent};
use tao::event_loop::{ControlFlow, EventLoopBuilder};
use tao::window::WindowBuilder;
use tokio::runtime::Runtime;
use wry::WebViewBuilder;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserEvent {
    /// Quit requested from outside the window (Ctrl-C).
    Quit,
}

/// Events that end the session.
pub fn quit_requested(event: &Event<'_, UserEvent>) -> bool {
    matches!(
        event,
        Event::WindowEvent {
            event: WindowEvent::CloseRequested,
            ..
        } | Event::UserEvent(UserEvent::Quit)
    )
}

/// Open the window on `source` and run the event loop on this thread.
///
/// Does not return once the loop is running; the backend is stopped before exit.
/// An error means the window never came up, and the backend is already stopped then.
pub fn run(runtime: Runtime, mut shell: Shell, source: &UiSource) -> Result<()> {
    let event_loop = EventLoopBuilder::<UserEvent>::with_user_event().build();

    let proxy = event_loop.create_proxy();
    let quit = shell.cancel_token();
    runtime.spawn(async move {
        quit.cancelled().await;
        // Fails once the loop is gone, which is fine
        let _ = proxy.send_event(UserEvent::Quit);
    });

    let built = open_window(&event_loop, &shell, source);
    let (window, webview) = match built {
        Ok(parts) => parts,
        Err(e) => {
            runtime.block_on(shell.stop());
            return Err(e);
        }
    };

    let mut shell = Some(shell);
    event_loop.run(move |event, _, control_flow| {
        *control_flow = ControlFlow::Wait;
        // Keep both alive for the lifetime of the loop
        let _ = (&window, &webview);

        if quit_requested(&event) {
            if let Some(mut shell) = shell.take() {
                tracing::info!("window closed, stopping backend");
                runtime.block_on(shell.stop());
            }
            *control_flow = ControlFlow::Exit;
        }
    })
}

fn open_window(
    event_loop: &tao::event_loop::EventLoop<UserEvent>,
    shell: &Shell,
    source: &UiSource,
) -> Result<(tao::window::Window, wry::WebView)> {
    let ui = &shell.settings().ui;
    let url = source.url()?;
    tracing::info!(title = %ui.window_title, url = %url, "opening window");

    let window = WindowBuilder::new()
        .with_title(&ui.window_title)
        .with_inner_size(tao::dpi::LogicalSize::new(
            f64::from(ui.window_width),
            f64::from(ui.window_height),
        ))
        .build(event_loop)
        .context("failed to create window")?;

    let webview = WebViewBuilder::new()
        .with_url(url.as_str())
        .with_devtools(shell.mode().is_dev())
        .with_new_window_req_handler(|target| {
            // Links that want a new window go to the system browser
            if let Err(e) = open::that(&target) {
                tracing::warn!(url = %target, error = %e, "could not open link");
            }
            false
        })
        .build(&window)
        .context("failed to create web view")?;

    Ok((window, webview))
}
