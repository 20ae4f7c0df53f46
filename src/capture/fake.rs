//! In-memory `ChartPage` for unit tests.

use std::{
    cell::{Cell, RefCell},
    collections::{HashMap, HashSet},
    io::Cursor,
    time::Duration,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

use crate::browser::ChartPage;
use crate::imaging::sidebar::SIDEBAR_COLOR;

#[derive(Default)]
pub(crate) struct FakePage {
    elements: HashSet<String>,
    values: HashMap<String, String>,
    png: Vec<u8>,
    fail_reads: bool,
    navigation_delay: Option<Duration>,
    /// `content_loaded` polls that report "still loading" after each `goto`.
    loading_polls: u32,
    loading_left: Cell<u32>,
    /// `element_ready` polls that report "not laid out yet".
    layout_polls: Cell<u32>,
    pub visits: RefCell<Vec<String>>,
}

impl FakePage {
    /// A page showing `selector` with a chart that carries a 50px sidebar.
    pub fn with_chart(selector: &str) -> Self {
        let mut page = Self::default();
        page.elements.insert(selector.to_string());
        page.png = chart_png(400, 120, 50);
        page
    }

    pub fn with_value(mut self, selector: &str, value: &str) -> Self {
        self.values.insert(selector.to_string(), value.to_string());
        self
    }

    pub fn failing_reads(mut self) -> Self {
        self.fail_reads = true;
        self
    }

    pub fn loading_for(mut self, polls: u32) -> Self {
        self.loading_polls = polls;
        self
    }

    pub fn chart_ready_after(self, polls: u32) -> Self {
        self.layout_polls.set(polls);
        self
    }

    pub fn with_screenshot(mut self, bytes: &[u8]) -> Self {
        self.png = bytes.to_vec();
        self
    }

    pub fn slow_navigation(mut self, delay: Duration) -> Self {
        self.navigation_delay = Some(delay);
        self
    }
}

#[async_trait(?Send)]
impl ChartPage for FakePage {
    async fn goto(&self, url: &str) -> Result<()> {
        self.visits.borrow_mut().push(url.to_string());
        self.loading_left.set(self.loading_polls);
        if let Some(delay) = self.navigation_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    async fn content_loaded(&self) -> Result<bool> {
        match self.loading_left.get() {
            0 => Ok(true),
            left => {
                self.loading_left.set(left - 1);
                Ok(false)
            }
        }
    }

    async fn element_ready(&self, selector: &str) -> Result<bool> {
        if !self.elements.contains(selector) {
            return Ok(false);
        }
        match self.layout_polls.get() {
            0 => Ok(true),
            left => {
                self.layout_polls.set(left - 1);
                Ok(false)
            }
        }
    }

    async fn input_value(&self, selector: &str) -> Result<Option<String>> {
        if self.fail_reads {
            return Err(anyhow!("execution context was destroyed"));
        }
        Ok(self.values.get(selector).cloned())
    }

    async fn screenshot_element(&self, selector: &str) -> Result<Vec<u8>> {
        if !self.elements.contains(selector) {
            return Err(anyhow!("no node for `{selector}`"));
        }
        Ok(self.png.clone())
    }
}

/// PNG whose rightmost `sidebar` columns are the sidebar color.
pub(crate) fn chart_png(width: u32, height: u32, sidebar: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, _| {
        if x >= width - sidebar {
            Rgb(SIDEBAR_COLOR)
        } else {
            Rgb([250, 250, 250])
        }
    });
    let mut bytes = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut bytes, ImageFormat::Png)
        .expect("encode png");
    bytes.into_inner()
}
