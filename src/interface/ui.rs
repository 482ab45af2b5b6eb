use ratatui::{
    prelude::*,
    symbols,
    widgets::{Axis, Block, BorderType, Borders, Cell, Chart, Dataset, GraphType, List, ListItem, Paragraph, Row, Table, Tabs, Wrap},
};

use crate::analysis::accuracy::AccuracyReport;
use crate::core::config::ReferenceConfig;
use crate::interface::state::{AppMode, AppState, WorkerStatus};

// --- Color Palette ---
const COL_FG: Color = Color::White;
const COL_HIGHLIGHT: Color = Color::Yellow;
const COL_ACCENT: Color = Color::Cyan;
const COL_SUCCESS: Color = Color::Green;
const COL_FAIL: Color = Color::Red;
const COL_HEADER: Color = Color::Magenta;
const COL_REFERENCE: Color = Color::LightRed;

pub fn draw(f: &mut Frame, app: &AppState) {
    if f.area().width < 40 || f.area().height < 10 {
        let p = Paragraph::new("Terminal too small.")
            .alignment(Alignment::Center)
            .block(Block::default().borders(Borders::ALL));
        f.render_widget(p, f.area());
        return;
    }

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(0), Constraint::Length(1)])
        .split(f.area());

    draw_header(f, app, chunks[0]);

    match app.mode {
        AppMode::Dashboard => draw_dashboard(f, app, chunks[1]),
        AppMode::Parameters => draw_parameters(f, app, chunks[1]),
    }

    draw_footer(f, app, chunks[2]);
}

fn draw_header(f: &mut Frame, app: &AppState, area: Rect) {
    let titles = vec![" 1:Dash ", " 2:Params "];
    let idx = match app.mode {
        AppMode::Dashboard => 0,
        AppMode::Parameters => 1,
    };

    let tabs = Tabs::new(titles)
        .block(Block::default().borders(Borders::BOTTOM).title(" AI-NEB "))
        .select(idx)
        .highlight_style(Style::default().fg(COL_HIGHLIGHT).add_modifier(Modifier::BOLD));

    f.render_widget(tabs, area);
}

fn draw_footer(f: &mut Frame, app: &AppState, area: Rect) {
    let (status_str, color) = match app.worker_status {
        WorkerStatus::Idle => ("IDLE", COL_FG),
        WorkerStatus::Starting => ("STARTING", COL_FG),
        WorkerStatus::Running => ("RUNNING", COL_SUCCESS),
        WorkerStatus::Converged => ("CONVERGED", COL_SUCCESS),
        WorkerStatus::Exhausted => ("EXHAUSTED", COL_HIGHLIGHT),
        WorkerStatus::Error => ("ERROR", COL_FAIL),
    };

    let training = app.telemetry.latest().map(|s| s.training_size).unwrap_or(0);

    let text = Line::from(vec![
        Span::styled(format!(" STATUS: {:<9}", status_str), Style::default().fg(color).add_modifier(Modifier::BOLD)),
        Span::raw(" | "),
        Span::raw(format!("Iter: {}/{}", app.current_iteration, app.config.convergence.max_iteration)),
        Span::raw(" | "),
        Span::raw(format!("Train: {}", training)),
        Span::raw(" | "),
        Span::raw(format!("Elapsed: {}s", app.start_time.elapsed().as_secs())),
        Span::raw(" | [Q]uit [1]Dash [2]Params"),
    ]);

    let p = Paragraph::new(text).style(Style::default().bg(Color::DarkGray).fg(Color::White));
    f.render_widget(p, area);
}

fn draw_dashboard(f: &mut Frame, app: &AppState, area: Rect) {
    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
        .split(area);

    let left_rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
        .split(cols[0]);

    draw_profile(f, app, left_rows[0]);
    draw_metrics(f, app, left_rows[1]);

    let right_rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Percentage(65), Constraint::Percentage(35)])
        .split(cols[1]);

    draw_logs(f, app, right_rows[0]);
    draw_stats(f, app, right_rows[1]);
}

fn bounds(points: &[(f64, f64)]) -> [f64; 2] {
    let (lo, hi) = points
        .iter()
        .fold((f64::MAX, f64::MIN), |(lo, hi), &(_, e)| (lo.min(e), hi.max(e)));
    if lo > hi {
        return [0.0, 1.0];
    }
    let pad = ((hi - lo) * 0.1).max(1e-3);
    [lo - pad, hi + pad]
}

fn draw_profile(f: &mut Frame, app: &AppState, area: Rect) {
    let block = Block::default()
        .title(" Energy Profile (latest band) ")
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded);

    let (surrogate, reference) = app.telemetry.profiles();
    if surrogate.is_empty() && reference.is_empty() {
        f.render_widget(block.title_bottom(" Waiting for data... "), area);
        return;
    }

    let mut all = surrogate.clone();
    all.extend_from_slice(&reference);
    let [y_lo, y_hi] = bounds(&all);
    let x_hi = all.iter().map(|p| p.0).fold(1.0, f64::max);

    let datasets = vec![
        Dataset::default()
            .name("surrogate")
            .marker(symbols::Marker::Braille)
            .graph_type(GraphType::Line)
            .style(Style::default().fg(COL_ACCENT))
            .data(&surrogate),
        Dataset::default()
            .name("reference")
            .marker(symbols::Marker::Dot)
            .graph_type(GraphType::Scatter)
            .style(Style::default().fg(COL_REFERENCE))
            .data(&reference),
    ];

    let chart = Chart::new(datasets)
        .block(block)
        .x_axis(
            Axis::default()
                .title("image")
                .style(Style::default().fg(Color::Gray))
                .bounds([0.0, x_hi])
                .labels(vec![Span::raw("0"), Span::raw(format!("{:.0}", x_hi))]),
        )
        .y_axis(
            Axis::default()
                .title("eV")
                .style(Style::default().fg(Color::Gray))
                .bounds([y_lo, y_hi])
                .labels(vec![Span::raw(format!("{:.3}", y_lo)), Span::raw(format!("{:.3}", y_hi))]),
        );
    f.render_widget(chart, area);
}

fn draw_metrics(f: &mut Frame, app: &AppState, area: Rect) {
    let header_cells = std::iter::once("Iter")
        .chain(AccuracyReport::NAMES)
        .map(|h| Cell::from(h).style(Style::default().fg(COL_HEADER)));
    let header = Row::new(header_cells).height(1).bottom_margin(1);

    let rows = app.telemetry.iterations.iter().rev().map(|s| {
        let mut cells = vec![Cell::from(format!("{}", s.iteration))];
        for (value, passed) in s.report.values().iter().zip(s.status.0) {
            let color = if passed { COL_SUCCESS } else { COL_FAIL };
            cells.push(Cell::from(format!("{:.4e}", value)).style(Style::default().fg(color)));
        }
        Row::new(cells).height(1)
    });

    let t = Table::new(
        rows,
        &[
            Constraint::Length(5),
            Constraint::Length(16),
            Constraint::Length(16),
            Constraint::Length(16),
            Constraint::Min(16),
        ],
    )
    .header(header)
    .block(Block::default().borders(Borders::ALL).title(" Accuracy (surrogate vs reference) "));

    f.render_widget(t, area);
}

fn draw_logs(f: &mut Frame, app: &AppState, area: Rect) {
    let block = Block::default().title(" System Log ").borders(Borders::ALL);
    let inner = block.inner(area);
    f.render_widget(block, area);

    let items: Vec<ListItem> = app
        .logs
        .iter()
        .rev()
        .map(|line| {
            let style = if line.to_lowercase().contains("error") || line.contains("failed") {
                Style::default().fg(COL_FAIL)
            } else if line.contains(">>>") {
                Style::default().fg(COL_SUCCESS)
            } else {
                Style::default().fg(Color::Gray)
            };

            ListItem::new(Line::from(vec![
                Span::styled(">", Style::default().fg(Color::DarkGray)),
                Span::raw(" "),
                Span::raw(line),
            ]))
            .style(style)
        })
        .collect();

    f.render_widget(List::new(items), inner);
}

fn draw_stats(f: &mut Frame, app: &AppState, area: Rect) {
    let block = Block::default().title(" Latest Relaxation ").borders(Borders::ALL);
    let inner = block.inner(area);
    f.render_widget(block, area);

    let kv = |k: &str, v: String, color: Color| -> Line {
        Line::from(vec![
            Span::styled(format!("{:<13}", k), Style::default().fg(Color::Gray)),
            Span::styled(v, Style::default().fg(color)),
        ])
    };

    let text = match app.telemetry.latest() {
        Some(s) => {
            let barrier = s
                .reference_profile
                .iter()
                .cloned()
                .filter(|e| e.is_finite())
                .fold(f64::MIN, f64::max)
                - s.reference_profile.first().cloned().unwrap_or(f64::NAN);
            vec![
                kv("Iteration:", s.iteration.to_string(), COL_HIGHLIGHT),
                kv("NEB steps:", s.relax_steps.to_string(), COL_HIGHLIGHT),
                kv(
                    "NEB fmax:",
                    format!("{:.4e}", s.relax_fmax),
                    if s.relax_converged { COL_SUCCESS } else { COL_FAIL },
                ),
                kv("Train size:", s.training_size.to_string(), COL_HIGHLIGHT),
                kv("Barrier:", format!("{:.5} eV", barrier), COL_SUCCESS),
            ]
        }
        None => vec![Line::from("No iteration finished yet.")],
    };

    f.render_widget(Paragraph::new(text).wrap(Wrap { trim: true }), inner);
}

fn draw_parameters(f: &mut Frame, app: &AppState, area: Rect) {
    let block = Block::default().borders(Borders::ALL).title(" Run Parameters ");
    let inner = block.inner(area);
    f.render_widget(block, area);

    let c = &app.config;

    let kv = |k: &str, v: String| -> ListItem {
        ListItem::new(Line::from(vec![
            Span::styled(format!("{:<18}", k), Style::default().fg(COL_ACCENT)),
            Span::raw(v),
        ]))
    };

    let reference = match &c.reference {
        ReferenceConfig::Gulp { executable, .. } => format!("GULP ({})", executable),
        ReferenceConfig::LennardJones { epsilon, sigma, cutoff } => {
            format!("Lennard-Jones (eps {}, sigma {}, rc {})", epsilon, sigma, cutoff)
        }
    };
    let species: Vec<&str> = c.species.iter().map(|s| s.symbol.as_str()).collect();

    let items = vec![
        kv("Initial:", c.initial_file.display().to_string()),
        kv("Final:", c.final_file.display().to_string()),
        kv("Species:", species.join(" ")),
        kv("Interior images:", c.num_inter_images.to_string()),
        kv("Workers:", app.workers.to_string()),
        kv("Reference:", reference),
        ListItem::new(Line::from(" ")),
        kv("Max iterations:", c.convergence.max_iteration.to_string()),
        kv("Energy RMSE:", format!("{:.3e}", c.convergence.energy_rmse)),
        kv("Energy max:", format!("{:.3e}", c.convergence.energy_maxresid)),
        kv("Force RMSE:", format!("{:.3e}", c.convergence.force_rmse)),
        kv("Force max:", format!("{:.3e}", c.convergence.force_maxresid)),
        ListItem::new(Line::from(" ")),
        kv("NEB method:", format!("{:?}", c.neb.method)),
        kv("Interpolation:", format!("{:?}", c.neb.interp)),
        kv("Climbing image:", c.neb.climb.to_string()),
        kv("fmax / steps:", format!("{} eV/Å / {}", c.neb.fmax, c.neb.steps)),
        kv("Spring:", format!("{} eV/Å²", c.neb.spring)),
        ListItem::new(Line::from(" ")),
        kv("Surrogate basis:", format!("{} x {} Å", c.surrogate.num_basis, c.surrogate.cutoff)),
        kv("Output dir:", c.output_dir.display().to_string()),
    ];

    f.render_widget(List::new(items), inner);
}
