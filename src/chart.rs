//! RTP chart artifact: cumulative platform-margin curve over order count.
//!
//! Renders a self-contained Plotly HTML document from the sampled points;
//! the executor uploads it to the object store and records the presigned
//! URL on the task.

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;
use tracing::info;

/// One chart point: `x` is the order count in units of 10 000, `y` the
/// cumulative platform margin `(cum_bet - cum_win) / cum_bet`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    pub time: String,
}

#[derive(Debug, Error)]
pub enum ChartError {
    #[error("no chart data")]
    NoData,

    #[error("chart io: {0}")]
    Io(#[from] std::io::Error),

    #[error("chart encode: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct ChartResult {
    pub html: String,
    /// Set when the chart was also written locally.
    pub file_path: Option<PathBuf>,
}

/// HTML chart generator.
#[derive(Debug, Clone)]
pub struct ChartGenerator {
    output_dir: PathBuf,
}

impl ChartGenerator {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Build the HTML document; optionally persist it under the output
    /// directory as `<task_id>.html`.
    pub fn generate(
        &self,
        points: &[Point],
        task_id: &str,
        game_name: &str,
        merchant: &str,
        save_local: bool,
    ) -> Result<ChartResult, ChartError> {
        if points.is_empty() {
            return Err(ChartError::NoData);
        }

        let xs: Vec<f64> = points.iter().map(|p| p.x).collect();
        let ys: Vec<f64> = points.iter().map(|p| p.y).collect();
        let times: Vec<&str> = points.iter().map(|p| p.time.as_str()).collect();

        let x_max = xs.iter().cloned().fold(0.0f64, f64::max);
        let (mut y_min, mut y_max) = (ys[0], ys[0]);
        for &y in &ys {
            y_min = y_min.min(y);
            y_max = y_max.max(y);
        }

        let heading = format!("merchant: {merchant}, game: {game_name}, task: {task_id}");
        let html = CHART_TEMPLATE
            .replace("__TITLE__", &heading)
            .replace("__X_DATA__", &serde_json::to_string(&xs)?)
            .replace("__Y_DATA__", &serde_json::to_string(&ys)?)
            .replace("__TIME_DATA__", &serde_json::to_string(&times)?)
            .replace("__X_MAX__", &format!("{x_max}"))
            .replace("__Y_MIN__", &format!("{y_min}"))
            .replace("__Y_MAX__", &format!("{y_max}"));

        let mut result = ChartResult {
            html,
            file_path: None,
        };

        if save_local {
            std::fs::create_dir_all(&self.output_dir)?;
            let path = self.output_dir.join(format!("{task_id}.html"));
            std::fs::write(&path, result.html.as_bytes())?;
            info!(path = %path.display(), "chart written locally");
            result.file_path = Some(path);
        }

        Ok(result)
    }
}

const CHART_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="UTF-8">
<title>__TITLE__</title>
<script src="https://cdn.plot.ly/plotly-2.27.0.min.js"></script>
<style>body{margin:0;padding:20px;background:#f5f5f5}.container{background:#fff;padding:20px;border-radius:8px;box-shadow:0 2px 4px rgba(0,0,0,.1)}</style>
</head>
<body>
<div class="container"><h1>__TITLE__</h1><div id="chart"></div></div>
<script>
var xData=__X_DATA__,yData=__Y_DATA__,timeData=__TIME_DATA__,xMax=__X_MAX__,yMin=__Y_MIN__,yMax=__Y_MAX__;
var margin={x:xData,y:yData,mode:'lines',name:'platform margin',line:{color:'#F00',width:2,shape:'spline'},customdata:timeData,hovertemplate:'orders: %{x:.2f}w<br>margin: %{y:.2%}<br>%{customdata}<extra></extra>'};
var ref2={x:[0,xMax],y:[0.02,0.02],mode:'lines',name:'2%',line:{color:'blue',dash:'dashdot'}};
var ref4={x:[0,xMax],y:[0.04,0.04],mode:'lines',name:'4%',line:{color:'green',dash:'dashdot'}};
var layout={title:'__TITLE__',
  xaxis:{title:'orders (x10k)',showgrid:true,automargin:true,zeroline:false},
  yaxis:{title:'platform margin',tickformat:'.0%',range:[Math.min(yMin,-0.05),Math.max(yMax,1)],showgrid:true},
  plot_bgcolor:'#E8F8FF',height:800,width:1600,hovermode:'closest',
  legend:{x:0.99,y:0.99,xanchor:'right'}};
Plotly.newPlot('chart',[margin,ref2,ref4],layout,{displayModeBar:false});
</script>
</body>
</html>"#;

#[cfg(test)]
mod tests {
    use super::*;

    fn points() -> Vec<Point> {
        vec![
            Point {
                x: 0.0001,
                y: 0.02,
                time: "2026-01-01 00:00:00".to_string(),
            },
            Point {
                x: 0.0002,
                y: 0.04,
                time: "2026-01-01 00:00:05".to_string(),
            },
        ]
    }

    #[test]
    fn test_generate_embeds_data() {
        let gen = ChartGenerator::new("./unused");
        let out = gen
            .generate(&points(), "20260101-18902-1", "Poseidon Power", "default", false)
            .unwrap();
        assert!(out.file_path.is_none());
        assert!(out.html.contains("20260101-18902-1"));
        assert!(out.html.contains("[0.0001,0.0002]"));
        assert!(out.html.contains("2026-01-01 00:00:05"));
    }

    #[test]
    fn test_generate_empty_is_error() {
        let gen = ChartGenerator::new("./unused");
        assert!(matches!(
            gen.generate(&[], "t", "g", "m", false),
            Err(ChartError::NoData)
        ));
    }

    #[test]
    fn test_generate_save_local() {
        let dir = tempfile::tempdir().unwrap();
        let gen = ChartGenerator::new(dir.path());
        let out = gen.generate(&points(), "t-1", "g", "m", true).unwrap();
        let path = out.file_path.unwrap();
        assert!(path.exists());
        assert!(std::fs::read_to_string(path).unwrap().contains("Plotly"));
    }
}
