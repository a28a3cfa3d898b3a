use anyhow::{Context, Result, anyhow};
use plotters::prelude::*;
use std::path::Path;
use training::TrainingHistory;

/// Points `(epoch, value)` with epochs counted from 1.
fn series(values: &[f64], scale: f64) -> Vec<(f64, f64)> {
    values
        .iter()
        .enumerate()
        .map(|(i, &value)| ((i + 1) as f64, value * scale))
        .collect()
}

/// Creates an SVG graph of the training history: accuracy on the left axis,
/// loss on the right, validation curves dashed when present.
pub fn create_training_history_graph(history: &TrainingHistory, output_path: &Path) -> Result<()> {
    if history.epochs() == 0 {
        return Err(anyhow!("Training history has no epochs to plot"));
    }
    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create graph directory")?;
    }

    let root = SVGBackend::new(output_path, (1024, 768)).into_drawing_area();
    root.fill(&WHITE).context("Failed to fill drawing area")?;

    // Determine the ranges for the chart
    let epoch_range = 1.0..(history.epochs().max(2) as f64);
    let loss_max = history
        .losses
        .iter()
        .chain(&history.val_losses)
        .fold(0.0, |a: f64, &b| a.max(b))
        .max(f64::EPSILON);

    let accuracy_formatter = |y: &f64| -> String { format!("{:.1}%", *y) };
    let x_formatter = |x: &f64| -> String { format!("{}", (*x).round()) };

    let mut chart = ChartBuilder::on(&root)
        .caption("Training Metrics", ("sans-serif", 30).into_font())
        .margin(10)
        .margin_bottom(60)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .right_y_label_area_size(60)
        .build_cartesian_2d(epoch_range.clone(), 0f64..100f64)
        .context("Failed to build chart")?
        .set_secondary_coord(epoch_range, 0f64..loss_max * 1.05);

    chart
        .configure_mesh()
        .x_labels(history.epochs().min(10))
        .y_labels(10)
        .disable_mesh()
        .y_label_formatter(&accuracy_formatter)
        .x_label_formatter(&x_formatter)
        .x_desc("Epoch")
        .y_desc("Accuracy (%)")
        .draw()
        .context("Failed to draw mesh")?;

    chart
        .configure_secondary_axes()
        .y_labels(10)
        .y_label_formatter(&|y: &f64| format!("{y:.4}"))
        .y_desc("Loss")
        .draw()
        .context("Failed to draw secondary axes")?;

    chart
        .draw_series(LineSeries::new(series(&history.accuracies, 100.0), &BLUE))
        .context("Failed to draw accuracy line")?
        .label("Accuracy")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &BLUE));

    chart
        .draw_secondary_series(LineSeries::new(series(&history.losses, 1.0), &RED))
        .context("Failed to draw loss line")?
        .label("Loss")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &RED));

    if history.has_validation() {
        chart
            .draw_series(DashedLineSeries::new(
                series(&history.val_accuracies, 100.0),
                6,
                4,
                BLUE.mix(0.6).stroke_width(1),
            ))
            .context("Failed to draw validation accuracy line")?
            .label("Validation accuracy")
            .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLUE.mix(0.6)));

        chart
            .draw_secondary_series(DashedLineSeries::new(
                series(&history.val_losses, 1.0),
                6,
                4,
                RED.mix(0.6).stroke_width(1),
            ))
            .context("Failed to draw validation loss line")?
            .label("Validation loss")
            .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], RED.mix(0.6)));
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .margin(10)
        .draw()
        .context("Failed to draw legend")?;

    root.present().context("Failed to write graph")?;
    Ok(())
}
