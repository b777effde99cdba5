mod api;
mod components;
mod models;
mod state;
mod ws;

use leptos::mount::mount_to_body;
use leptos::prelude::*;

use components::chat::ChatArea;
use state::AppState;

/// Root application component.
#[component]
fn App() -> impl IntoView {
    let state = AppState::provide();

    // One session per mounted widget; dropping it ends the conversation.
    state.load_health();
    state.connect();
    on_cleanup(ws::close);

    view! {
        <div class="app-container">
            <ChatArea />
        </div>
    }
}

fn main() {
    console_log::init_with_level(log::Level::Debug).expect("Failed to init logger");
    mount_to_body(App);
}
