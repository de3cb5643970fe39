//! Frame rendering for the 128x64 status panel.
//!
//! The renderer draws into any `BinaryColor` target; both build targets use
//! `MonoFramebuffer` as the backing store (the device flushes it to the OLED
//! page by page, the host keeps it in memory).

use embedded_graphics::{
    mono_font::{
        ascii::{FONT_10X20, FONT_6X10},
        MonoTextStyle,
    },
    pixelcolor::BinaryColor,
    prelude::*,
    primitives::{Circle, PrimitiveStyle, Rectangle},
    text::Text,
};

use doorbell_common::{Frame, StatusFrame};

pub const DISPLAY_WIDTH: u32 = 128;
pub const DISPLAY_HEIGHT: u32 = 64;

/// In-memory mono framebuffer. Out-of-bounds pixels are clipped rather
/// than treated as errors, and overdraw is allowed.
pub struct MonoFramebuffer {
    pixels: Vec<bool>,
    width: u32,
    height: u32,
}

impl MonoFramebuffer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            pixels: vec![false; (width * height) as usize],
            width,
            height,
        }
    }

    /// Buffer matching the panel dimensions.
    pub fn panel_sized() -> Self {
        Self::new(DISPLAY_WIDTH, DISPLAY_HEIGHT)
    }

    pub fn is_lit(&self, x: u32, y: u32) -> bool {
        if x >= self.width || y >= self.height {
            return false;
        }
        self.pixels[(y * self.width + x) as usize]
    }

    pub fn lit_count(&self) -> usize {
        self.pixels.iter().filter(|lit| **lit).count()
    }

    /// Draws a frame into the buffer; drawing into memory cannot fail.
    pub fn render(&mut self, frame: &Frame) {
        match draw_frame(self, frame) {
            Ok(()) => {}
            Err(never) => match never {},
        }
    }
}

impl DrawTarget for MonoFramebuffer {
    type Color = BinaryColor;
    type Error = core::convert::Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(coord, color) in pixels {
            if coord.x >= 0
                && coord.y >= 0
                && (coord.x as u32) < self.width
                && (coord.y as u32) < self.height
            {
                let idx = (coord.y as u32 * self.width + coord.x as u32) as usize;
                self.pixels[idx] = color.is_on();
            }
        }
        Ok(())
    }
}

impl OriginDimensions for MonoFramebuffer {
    fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

pub fn draw_frame<D>(target: &mut D, frame: &Frame) -> Result<(), D::Error>
where
    D: DrawTarget<Color = BinaryColor>,
{
    clear(target)?;
    match frame {
        Frame::Chime => draw_chime(target),
        Frame::Status(status) => draw_status(target, status),
        Frame::PowerSave => Ok(()),
    }
}

fn clear<D>(target: &mut D) -> Result<(), D::Error>
where
    D: DrawTarget<Color = BinaryColor>,
{
    Rectangle::new(Point::zero(), Size::new(DISPLAY_WIDTH, DISPLAY_HEIGHT))
        .into_styled(PrimitiveStyle::with_fill(BinaryColor::Off))
        .draw(target)
}

fn draw_chime<D>(target: &mut D) -> Result<(), D::Error>
where
    D: DrawTarget<Color = BinaryColor>,
{
    let style = MonoTextStyle::new(&FONT_10X20, BinaryColor::On);

    Circle::new(Point::new(34, 2), 60)
        .into_styled(PrimitiveStyle::with_stroke(BinaryColor::On, 2))
        .draw(target)?;

    // 4 glyphs at 10px, centered horizontally
    Text::new("RING", Point::new(44, 39), style).draw(target)?;
    Ok(())
}

fn draw_status<D>(target: &mut D, status: &StatusFrame) -> Result<(), D::Error>
where
    D: DrawTarget<Color = BinaryColor>,
{
    let style = MonoTextStyle::new(&FONT_6X10, BinaryColor::On);

    let wifi_line = match status.rssi_dbm {
        Some(rssi) => format!("{} {}dBm", status.ssid, rssi),
        None => status.ssid.clone(),
    };
    Text::new(&wifi_line, Point::new(0, 10), style).draw(target)?;
    Text::new(&status.ip_address, Point::new(0, 24), style).draw(target)?;
    Text::new(&status.broker_endpoint, Point::new(0, 38), style).draw(target)?;

    let broker_line = if status.broker_connected {
        "mqtt up"
    } else {
        "mqtt down"
    };
    Text::new(broker_line, Point::new(0, 52), style).draw(target)?;

    let mut spinner = [0_u8; 4];
    let spinner = status.spinner.encode_utf8(&mut spinner);
    Text::new(spinner, Point::new(118, 52), style).draw(target)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_frame() -> StatusFrame {
        StatusFrame {
            ssid: "home-net".to_string(),
            rssi_dbm: Some(-61),
            ip_address: "192.168.1.42".to_string(),
            broker_endpoint: "192.168.1.100:1883".to_string(),
            broker_connected: true,
            spinner: '/',
        }
    }

    #[test]
    fn chime_frame_lights_pixels() {
        let mut display = MonoFramebuffer::panel_sized();
        display.render(&Frame::Chime);
        assert!(display.lit_count() > 100);
    }

    #[test]
    fn status_frame_lights_pixels() {
        let mut display = MonoFramebuffer::panel_sized();
        display.render(&Frame::Status(status_frame()));
        assert!(display.lit_count() > 100);
    }

    #[test]
    fn power_save_clears_previous_frame() {
        let mut display = MonoFramebuffer::panel_sized();
        display.render(&Frame::Chime);
        assert!(display.lit_count() > 0);

        display.render(&Frame::PowerSave);
        assert_eq!(display.lit_count(), 0);
    }

    #[test]
    fn redraw_replaces_rather_than_accumulates() {
        let mut display = MonoFramebuffer::panel_sized();
        display.render(&Frame::Status(status_frame()));
        let first = display.lit_count();

        display.render(&Frame::Status(status_frame()));
        assert_eq!(display.lit_count(), first);
    }

    #[test]
    fn out_of_bounds_draws_are_clipped() {
        let mut display = MonoFramebuffer::new(10, 10);
        let style = MonoTextStyle::new(&FONT_6X10, BinaryColor::On);
        Text::new("way too wide for this display", Point::new(-4, 8), style)
            .draw(&mut display)
            .unwrap();

        assert!(!display.is_lit(50, 8));
    }
}
