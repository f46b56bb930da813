mod common;

use std::time::{Duration, Instant};

use common::*;
use crossterm::event::{Event, KeyCode};
use pretty_assertions::assert_eq;
use ptymux_mux::{render, Direction, Layout, Mux, PaneSpec, SizeSpec};
use ratatui::{backend::TestBackend, buffer::Buffer, layout::Rect, Terminal};

fn screen_text(buffer: &Buffer) -> String {
    let area = buffer.area;
    (area.y..area.y + area.height)
        .map(|y| {
            (area.x..area.x + area.width)
                .map(|x| buffer[(x, y)].symbol().to_string())
                .collect::<String>()
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn draw(mux: &Mux, width: u16, height: u16) -> String {
    let mut terminal = Terminal::new(TestBackend::new(width, height)).unwrap();
    terminal.draw(|frame| render::draw(frame, mux)).unwrap();
    screen_text(terminal.backend().buffer())
}

#[tokio::test]
async fn keys_go_to_the_focused_pane() {
    let layout = split(
        Direction::Horizontal,
        vec![(SizeSpec::Auto, shell_pane()), (SizeSpec::Auto, shell_pane())],
    );
    let (mut mux, registry) = start(layout).await;
    assert_eq!(mux.focused(), Some(0));

    mux.handle_key(ctrl('b'), Instant::now()).await;
    mux.handle_key(key(KeyCode::Char('n')), Instant::now()).await;
    assert_eq!(mux.focused(), Some(1));

    type_text(&mut mux, "printf 'A%sB\\n' X\n").await;
    wait_for_text(&mux, 1, "AXB").await;
    assert!(!mux.panes()[0].session().snapshot().text.contains("AXB"));

    mux.handle_key(ctrl('b'), Instant::now()).await;
    mux.handle_key(key(KeyCode::Left), Instant::now()).await;
    assert_eq!(mux.focused(), Some(0));

    registry.shutdown().await;
}

#[tokio::test]
async fn exited_pane_loses_focus_and_last_exit_quits() {
    let mut focused_script = script_pane("exit 3");
    focused_script.focus = true;
    let layout = split(
        Direction::Vertical,
        vec![(SizeSpec::Auto, shell_pane()), (SizeSpec::Auto, focused_script)],
    );
    let (mut mux, _registry) = start(layout).await;
    assert_eq!(mux.focused(), Some(1));

    pump_until(&mut mux, |mux| mux.panes()[1].exit_code().is_some()).await;
    assert_eq!(mux.panes()[1].exit_code(), Some(3));
    assert_eq!(mux.focused(), Some(0));
    assert!(!mux.should_quit());

    // Focus cycling skips the exited pane
    mux.handle_key(ctrl('b'), Instant::now()).await;
    mux.handle_key(key(KeyCode::Char('n')), Instant::now()).await;
    assert_eq!(mux.focused(), Some(0));

    type_text(&mut mux, "exit 0\n").await;
    pump_until(&mut mux, |mux| mux.should_quit()).await;
    assert_eq!(mux.panes()[0].exit_code(), Some(0));
    assert_eq!(mux.focused(), None);
}

#[tokio::test]
async fn exited_pane_is_drawn_marked() {
    let layout = split(
        Direction::Horizontal,
        vec![
            (SizeSpec::Percent(50.0), shell_pane()),
            (
                SizeSpec::Auto,
                PaneSpec {
                    title: Some("job".to_string()),
                    ..script_pane("printf gone; exit 2")
                },
            ),
        ],
    );
    let (mut mux, registry) = start(layout).await;
    pump_until(&mut mux, |mux| mux.panes()[1].is_exited()).await;

    let screen = draw(&mux, 80, 24);
    assert!(screen.contains("job [exited 2]"), "screen was:\n{}", screen);
    assert!(screen.contains("gone"));

    registry.shutdown().await;
}

#[tokio::test]
async fn pane_output_is_rendered_inside_its_border() {
    let pane = PaneSpec {
        title: Some("greeter".to_string()),
        ..script_pane("printf 'hello there'; sleep 30")
    };
    let (mux, registry) = start(Layout::new(ptymux_mux::Node::Pane(pane))).await;
    wait_for_text(&mux, 0, "hello there").await;

    let screen = draw(&mux, 80, 24);
    let lines: Vec<&str> = screen.lines().collect();
    assert!(lines[0].contains("greeter"));
    assert!(lines[1].contains("hello there"));
    assert!(lines[1].starts_with('│'));

    mux.shutdown().await;
    assert!(registry.is_empty().await);
}

#[tokio::test]
async fn resize_recomputes_pane_sizes() {
    let layout = split(
        Direction::Vertical,
        vec![(SizeSpec::Percent(50.0), shell_pane()), (SizeSpec::Auto, shell_pane())],
    );
    let (mut mux, registry) = start(layout).await;
    assert_eq!(mux.panes()[0].session().size(), (78, 10));

    mux.handle_event(Event::Resize(100, 40), Instant::now()).await;
    assert_eq!(
        mux.rects(),
        &[Rect::new(0, 0, 100, 20), Rect::new(0, 20, 100, 20)]
    );
    for pane in mux.panes() {
        assert_eq!(pane.session().size(), (98, 18));
    }

    registry.shutdown().await;
}

#[tokio::test]
async fn double_ctrl_c_and_prefix_q_both_exit() {
    let (mut mux, registry) = start(split(Direction::Vertical, vec![(SizeSpec::Auto, shell_pane())])).await;
    let now = Instant::now();

    mux.handle_key(ctrl('c'), now).await;
    assert!(!mux.should_quit());
    mux.handle_key(ctrl('c'), now + Duration::from_millis(300)).await;
    assert!(mux.should_quit());
    registry.shutdown().await;

    let (mut mux, registry) = start(split(Direction::Vertical, vec![(SizeSpec::Auto, shell_pane())])).await;
    mux.handle_key(ctrl('b'), Instant::now()).await;
    mux.handle_key(key(KeyCode::Char('q')), Instant::now()).await;
    assert!(mux.should_quit());
    registry.shutdown().await;
}

#[tokio::test]
async fn help_popup_toggles() {
    let (mut mux, registry) = start(split(Direction::Vertical, vec![(SizeSpec::Auto, shell_pane())])).await;

    mux.handle_key(ctrl('b'), Instant::now()).await;
    mux.handle_key(key(KeyCode::Char('?')), Instant::now()).await;
    assert!(mux.show_help());
    assert!(draw(&mux, 80, 24).contains("Keyboard Shortcuts"));

    mux.handle_key(ctrl('b'), Instant::now()).await;
    mux.handle_key(key(KeyCode::Char('?')), Instant::now()).await;
    assert!(!mux.show_help());

    registry.shutdown().await;
}

#[tokio::test]
async fn failed_pane_start_cleans_up() {
    let broken = PaneSpec {
        cwd: Some("/no/such/dir".into()),
        ..shell_pane()
    };
    let layout = split(
        Direction::Horizontal,
        vec![(SizeSpec::Auto, shell_pane()), (SizeSpec::Auto, broken)],
    );

    let options = test_options();
    let registry = std::sync::Arc::new(ptymux_terminal::PtyRegistry::new(options.registry.clone()));
    let err = Mux::start(layout, Rect::new(0, 0, 80, 24), registry.clone(), &options)
        .await
        .err()
        .expect("start should fail");

    assert!(err.to_string().contains("pane 2"));
    assert!(registry.is_empty().await);
}
