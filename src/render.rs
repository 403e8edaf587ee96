use image::{ImageBuffer, Rgb, RgbImage};
use itertools::Itertools;
use std::{collections::HashMap, path::Path};
use tracing::info;

use crate::boundary::{extent, TractShape};
use crate::error::Result;
use crate::tract::{Borough, BOROUGHS};

const WIDTH: u32 = 960;
const HEIGHT: u32 = 600;
const MARGIN_LEFT: u32 = 90;
const MARGIN_RIGHT: u32 = 280;
const MARGIN_TOP: u32 = 80;
const MARGIN_BOTTOM: u32 = 80;

const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
const BLACK: Rgb<u8> = Rgb([0, 0, 0]);
const GRID: Rgb<u8> = Rgb([229, 236, 246]);
const FALSE_COLOUR: Rgb<u8> = Rgb([239, 85, 59]);
const TRUE_COLOUR: Rgb<u8> = Rgb([99, 110, 250]);

/// Grouped bar chart of false/true counts per borough.
pub struct BarChart<'a> {
    pub title: &'a str,
    pub x_label: &'a str,
    pub y_label: &'a str,
    pub legend_title: &'a str,
    pub groups: Vec<(Borough, [usize; 2])>,
}

/// Counts `(borough, flag)` pairs into `[false, true]` per borough, in
/// borough order. Boroughs without any rows are left out.
pub fn sign_counts<I>(items: I) -> Vec<(Borough, [usize; 2])>
where
    I: IntoIterator<Item = (Borough, bool)>,
{
    let counts = items.into_iter().counts();
    BOROUGHS
        .iter()
        .filter_map(|b| {
            let f = counts.get(&(*b, false)).copied().unwrap_or(0);
            let t = counts.get(&(*b, true)).copied().unwrap_or(0);
            if f + t == 0 {
                None
            } else {
                Some((*b, [f, t]))
            }
        })
        .collect()
}

/// 5x7 bitmap glyphs, one byte per row, low five bits left to right.
fn glyph(c: char) -> [u8; 7] {
    match c.to_ascii_uppercase() {
        'A' => [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'B' => [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'D' => [0x1E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1E],
        'E' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
        'F' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10],
        'G' => [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F],
        'H' => [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'I' => [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
        'J' => [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0C],
        'K' => [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
        'M' => [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
        'N' => [0x11, 0x11, 0x19, 0x15, 0x13, 0x11, 0x11],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'P' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
        'Q' => [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        'S' => [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'U' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'V' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04],
        'W' => [0x11, 0x11, 0x11, 0x15, 0x15, 0x15, 0x0A],
        'X' => [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11],
        'Y' => [0x11, 0x11, 0x0A, 0x04, 0x04, 0x04, 0x04],
        'Z' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F],
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        '<' => [0x02, 0x04, 0x08, 0x10, 0x08, 0x04, 0x02],
        '>' => [0x08, 0x04, 0x02, 0x01, 0x02, 0x04, 0x08],
        '-' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
        '+' => [0x00, 0x04, 0x04, 0x1F, 0x04, 0x04, 0x00],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
        ',' => [0x00, 0x00, 0x00, 0x00, 0x0C, 0x04, 0x08],
        ':' => [0x00, 0x0C, 0x0C, 0x00, 0x0C, 0x0C, 0x00],
        '(' => [0x02, 0x04, 0x08, 0x08, 0x08, 0x04, 0x02],
        ')' => [0x08, 0x04, 0x02, 0x02, 0x02, 0x04, 0x08],
        '/' => [0x01, 0x01, 0x02, 0x04, 0x08, 0x10, 0x10],
        _ => [0; 7],
    }
}

fn text_width(text: &str, scale: u32) -> u32 {
    let n = text.chars().count() as u32;
    if n == 0 {
        0
    } else {
        n * 6 * scale - scale
    }
}

fn put(img: &mut RgbImage, x: i64, y: i64, colour: Rgb<u8>) {
    if x >= 0 && y >= 0 && (x as u32) < img.width() && (y as u32) < img.height() {
        img.put_pixel(x as u32, y as u32, colour);
    }
}

fn fill_rect(img: &mut RgbImage, x0: i64, y0: i64, x1: i64, y1: i64, colour: Rgb<u8>) {
    for y in y0.min(y1)..y0.max(y1) {
        for x in x0.min(x1)..x0.max(x1) {
            put(img, x, y, colour);
        }
    }
}

/// Draws `text` with its top left corner at (x, y).
fn draw_text(img: &mut RgbImage, x: i64, y: i64, text: &str, scale: u32, colour: Rgb<u8>) {
    let s = scale as i64;
    for (i, c) in text.chars().enumerate() {
        let gx = x + i as i64 * 6 * s;
        for (row, bits) in glyph(c).iter().enumerate() {
            for col in 0..5 {
                if bits & (0x10 >> col) != 0 {
                    let px = gx + col as i64 * s;
                    let py = y + row as i64 * s;
                    fill_rect(img, px, py, px + s, py + s, colour);
                }
            }
        }
    }
}

fn draw_text_centred(img: &mut RgbImage, cx: i64, y: i64, text: &str, scale: u32, colour: Rgb<u8>) {
    let x = cx - text_width(text, scale) as i64 / 2;
    draw_text(img, x, y, text, scale, colour);
}

/// Tick spacing of 1, 2 or 5 times a power of ten giving at most 8 ticks.
fn tick_step(max: usize) -> usize {
    let mut magnitude = 1;
    loop {
        for m in [1, 2, 5] {
            let step = m * magnitude;
            if max.div_ceil(step) <= 8 {
                return step;
            }
        }
        magnitude *= 10;
    }
}

pub fn draw_bar_chart<P: AsRef<Path>>(chart: &BarChart, path: P) -> Result<()> {
    let mut img: RgbImage = ImageBuffer::from_pixel(WIDTH, HEIGHT, WHITE);

    let x0 = MARGIN_LEFT as i64;
    let x1 = (WIDTH - MARGIN_RIGHT) as i64;
    let y0 = MARGIN_TOP as i64;
    let y1 = (HEIGHT - MARGIN_BOTTOM) as i64;
    let plot_h = (y1 - y0) as f64;

    draw_text_centred(&mut img, WIDTH as i64 / 2, 20, chart.title, 2, BLACK);
    draw_text(&mut img, 10, y0 - 26, chart.y_label, 2, BLACK);

    let max = chart
        .groups
        .iter()
        .flat_map(|(_, c)| c.iter().copied())
        .max()
        .unwrap_or(0)
        .max(1);
    let step = tick_step(max);
    let y_max = max.div_ceil(step) * step;
    let to_y = |v: usize| y1 - ((v as f64 / y_max as f64) * plot_h).round() as i64;

    let mut tick = 0;
    while tick <= y_max {
        let y = to_y(tick);
        fill_rect(&mut img, x0, y, x1, y + 1, GRID);
        let label = tick.to_string();
        draw_text(&mut img, x0 - 10 - text_width(&label, 2) as i64, y - 7, &label, 2, BLACK);
        tick += step;
    }

    if !chart.groups.is_empty() {
        let group_w = (x1 - x0) as f64 / chart.groups.len() as f64;
        let bar_w = (group_w * 0.35).round() as i64;
        for (i, (borough, counts)) in chart.groups.iter().enumerate() {
            let gx = x0 as f64 + i as f64 * group_w;
            let centre = (gx + group_w / 2.0).round() as i64;
            for (j, (count, colour)) in counts.iter().zip([FALSE_COLOUR, TRUE_COLOUR]).enumerate() {
                let bx = if j == 0 { centre - bar_w } else { centre };
                let top = to_y(*count);
                fill_rect(&mut img, bx, top, bx + bar_w, y1, colour);
                let label = count.to_string();
                draw_text_centred(&mut img, bx + bar_w / 2, top - 12, &label, 1, BLACK);
            }
            draw_text_centred(&mut img, centre, y1 + 12, borough.name(), 2, BLACK);
        }
    }

    fill_rect(&mut img, x0 - 1, y0, x0 + 1, y1 + 1, BLACK);
    fill_rect(&mut img, x0 - 1, y1, x1, y1 + 2, BLACK);
    draw_text_centred(&mut img, (x0 + x1) / 2, HEIGHT as i64 - 36, chart.x_label, 2, BLACK);

    let lx = x1 + 24;
    draw_text(&mut img, lx, y0, chart.legend_title, 1, BLACK);
    for (i, (label, colour)) in [("False", FALSE_COLOUR), ("True", TRUE_COLOUR)].into_iter().enumerate() {
        let ly = y0 + 20 + i as i64 * 26;
        fill_rect(&mut img, lx, ly, lx + 16, ly + 16, colour);
        draw_text(&mut img, lx + 24, ly + 1, label, 2, BLACK);
    }

    img.save(path.as_ref())?;
    info!("Wrote {}", path.as_ref().display());
    Ok(())
}

/// Range the continuous colour scale spans; values outside are clamped.
pub const GAP_RANGE: (f64, f64) = (-10000.0, 10000.0);

const NO_DATA_FILL: &str = "#e5e5e5";
const TRUE_FILL: &str = "#636efa";
const FALSE_FILL: &str = "#ef553b";
const NEGATIVE: [f64; 3] = [178.0, 24.0, 43.0];
const NEUTRAL: [f64; 3] = [247.0, 247.0, 247.0];
const POSITIVE: [f64; 3] = [33.0, 102.0, 172.0];

const MAP_WIDTH: f64 = 900.0;
const MAP_HEIGHT: f64 = 700.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MapValue {
    Gap(Option<f64>),
    Flag(bool),
}

impl MapValue {
    fn fill(&self) -> String {
        match self {
            MapValue::Gap(Some(v)) => diverging_colour(*v, GAP_RANGE),
            MapValue::Gap(None) => NO_DATA_FILL.to_owned(),
            MapValue::Flag(true) => TRUE_FILL.to_owned(),
            MapValue::Flag(false) => FALSE_FILL.to_owned(),
        }
    }

    fn label(&self) -> String {
        match self {
            MapValue::Gap(Some(v)) => format!("{:.0}", v),
            MapValue::Gap(None) => "no data".to_owned(),
            MapValue::Flag(b) => b.to_string(),
        }
    }
}

/// A choropleth layer keyed by map tract id.
pub struct ChoroplethMap<'a> {
    pub title: &'a str,
    pub legend: &'a str,
    pub values: HashMap<String, MapValue>,
}

pub fn diverging_colour(v: f64, (min, max): (f64, f64)) -> String {
    let t = ((v - min) / (max - min)).clamp(0.0, 1.0);
    let (from, to, u) = if t < 0.5 {
        (NEGATIVE, NEUTRAL, t * 2.0)
    } else {
        (NEUTRAL, POSITIVE, (t - 0.5) * 2.0)
    };
    let c: Vec<u8> = (0..3)
        .map(|i| (from[i] + (to[i] - from[i]) * u).round() as u8)
        .collect();
    format!("#{:02x}{:02x}{:02x}", c[0], c[1], c[2])
}

/// SVG path data for `shapes` fitted into the map viewport.
fn svg_paths(shapes: &[TractShape]) -> Vec<String> {
    let Some(rect) = extent(shapes) else {
        return vec![String::new(); shapes.len()];
    };
    let (min, max) = (rect.min(), rect.max());
    let kx = ((min.y + max.y) / 2.0).to_radians().cos();
    let w = (max.x - min.x) * kx;
    let h = max.y - min.y;
    let scale = if w < 1e-14 || h < 1e-14 {
        1.0
    } else {
        (MAP_WIDTH / w).min(MAP_HEIGHT / h)
    };

    shapes
        .iter()
        .map(|s| {
            let mut d = String::new();
            for polygon in &s.shape {
                for ring in std::iter::once(polygon.exterior()).chain(polygon.interiors()) {
                    for (i, c) in ring.coords().enumerate() {
                        let x = (c.x - min.x) * kx * scale;
                        let y = (max.y - c.y) * scale;
                        d.push_str(&format!("{}{:.1},{:.1}", if i == 0 { "M" } else { " L" }, x, y));
                    }
                    d.push_str(" Z ");
                }
            }
            d
        })
        .collect()
}

fn legend_html(map: &ChoroplethMap) -> String {
    let categorical = map.values.values().any(|v| matches!(v, MapValue::Flag(_)));
    if categorical {
        format!(
            r##"<div class="legend"><strong>{}</strong>
<span class="swatch" style="background:{}"></span>True
<span class="swatch" style="background:{}"></span>False</div>"##,
            map.legend, TRUE_FILL, FALSE_FILL
        )
    } else {
        format!(
            r##"<div class="legend"><strong>{}</strong>
<span>{:.0}</span><span class="ramp" style="background:linear-gradient(to right, {}, {}, {})"></span><span>{:.0}</span></div>"##,
            map.legend,
            GAP_RANGE.0,
            diverging_colour(GAP_RANGE.0, GAP_RANGE),
            diverging_colour(0.0, GAP_RANGE),
            diverging_colour(GAP_RANGE.1, GAP_RANGE),
            GAP_RANGE.1
        )
    }
}

/// Writes a standalone HTML page with one SVG path per tract. Hovering a
/// tract shows its id and value.
pub fn write_choropleth<P: AsRef<Path>>(map: &ChoroplethMap, shapes: &[TractShape], path: P) -> Result<()> {
    let mut body = String::new();
    let mut matched = 0;
    for (shape, d) in shapes.iter().zip(svg_paths(shapes)) {
        let (fill, label) = match map.values.get(&shape.id) {
            Some(v) => {
                matched += 1;
                (v.fill(), v.label())
            }
            None => (NO_DATA_FILL.to_owned(), "no data".to_owned()),
        };
        body.push_str(&format!(
            "<path d=\"{}\" fill=\"{}\"><title>Census Tract {}: {}</title></path>\n",
            d.trim_end(),
            fill,
            shape.id,
            label
        ));
    }

    let html = format!(
        r##"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>{title}</title>
<style>
body {{ font-family: sans-serif; margin: 24px; }}
path {{ stroke: #ffffff; stroke-width: 0.3; fill-rule: evenodd; }}
path:hover {{ stroke: #000000; stroke-width: 1.2; }}
.legend {{ margin: 12px 0; display: flex; align-items: center; gap: 8px; }}
.swatch {{ display: inline-block; width: 16px; height: 16px; }}
.ramp {{ display: inline-block; width: 240px; height: 14px; }}
</style>
</head>
<body>
<h2>{title}</h2>
{legend}
<svg width="{w}" height="{h}" viewBox="0 0 {w} {h}" style="background:white">
{body}</svg>
</body>
</html>
"##,
        title = map.title,
        legend = legend_html(map),
        w = MAP_WIDTH,
        h = MAP_HEIGHT,
        body = body
    );

    std::fs::write(path.as_ref(), html)?;
    info!(
        "Wrote {} ({} of {} tracts with data)",
        path.as_ref().display(),
        matched,
        shapes.len()
    );
    Ok(())
}
