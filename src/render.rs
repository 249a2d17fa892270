use iced::widget::{column, rich_text, row, span, text, Column};
use iced::{font, Color, Element, Font};

use crate::markdown::{self, Block, Span};

const BODY_SIZE: u16 = 16;
const HEADING_COLOR: Color = Color { r: 0.98, g: 0.75, b: 0.14, a: 1.0 };
const BOLD_COLOR: Color = Color { r: 0.99, g: 0.90, b: 0.54, a: 1.0 };
const ITALIC_COLOR: Color = Color { r: 0.80, g: 0.74, b: 0.65, a: 1.0 };

const BOLD: Font = Font {
    weight: font::Weight::Bold,
    ..Font::DEFAULT
};

const ITALIC: Font = Font {
    style: font::Style::Italic,
    ..Font::DEFAULT
};

/// Render streamed markdown. Safe to call on every fragment; half-finished
/// markers simply show up as literal asterisks until their partner arrives.
pub fn markdown<'a, Message>(content: &str) -> Element<'a, Message>
where
    Message: Clone + 'static,
{
    let blocks = markdown::parse_blocks(content);

    Column::with_children(blocks.iter().map(block))
        .spacing(14)
        .into()
}

fn block<'a, Message>(block: &Block) -> Element<'a, Message>
where
    Message: Clone + 'static,
{
    match block {
        Block::Heading { level, text } => {
            let size = match level {
                1 => 28,
                2 => 24,
                _ => 20,
            };
            inline(text, size, Some(HEADING_COLOR), true)
        }
        Block::UnorderedList(items) => list(items.iter().map(|item| ("•".to_string(), item))),
        Block::OrderedList(items) => list(
            items
                .iter()
                .enumerate()
                .map(|(i, item)| (format!("{}.", i + 1), item)),
        ),
        Block::Paragraph(text) => inline(text, BODY_SIZE, None, false),
    }
}

fn list<'a, 'b, Message>(items: impl Iterator<Item = (String, &'b String)>) -> Element<'a, Message>
where
    Message: Clone + 'static,
{
    let rows = items.map(|(marker, item)| {
        row![
            text(marker).size(BODY_SIZE).width(24),
            inline(item, BODY_SIZE, None, false),
        ]
        .spacing(6)
        .into()
    });

    column(rows).spacing(6).padding([0, 8]).into()
}

fn inline<'a, Message>(source: &str, size: u16, color: Option<Color>, heading: bool) -> Element<'a, Message>
where
    Message: Clone + 'static,
{
    let spans: Vec<text::Span<'a, Message>> = markdown::parse_inline(source)
        .into_iter()
        .map(|piece| {
            let styled = match piece {
                Span::Plain(s) if heading => span(s).font(BOLD),
                Span::Plain(s) => span(s),
                Span::Bold(s) => span(s).font(BOLD).color(BOLD_COLOR),
                Span::Italic(s) => span(s).font(ITALIC).color(ITALIC_COLOR),
            };
            let styled = styled.size(size);
            match color {
                Some(color) => styled.color(color),
                None => styled,
            }
        })
        .collect();

    let rich: text::Rich<'a, Message> = rich_text(spans);
    rich.into()
}
