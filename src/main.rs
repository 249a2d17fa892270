mod config;
mod gemini;
mod logging;
mod markdown;
mod render;
mod session;
mod transcript;
mod upload;

use iced::{
    widget::{button, column, container, horizontal_space, image, row, scrollable, text, text_input, Column},
    Element, Length, Task, Theme, Subscription,
    time, clipboard,
    event::{self, Event as IcedEvent},
    alignment, Padding,
    window,
};
use futures_util::StreamExt;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::Config;
use crate::gemini::GeminiClient;
use crate::session::{AnalysisState, Epoch, Session, StreamEvent};
use crate::transcript::{Speaker, TurnId};
use crate::upload::UploadedImage;

fn main() -> iced::Result {
    let config = Config::load();
    logging::init(&config.logging.level);

    let size = iced::Size::new(config.window.width as f32, config.window.height as f32);

    iced::application("Codex Decipher", App::update, App::view)
        .theme(App::theme)
        .subscription(App::subscription)
        .window(window::Settings {
            size,
            position: window::Position::Centered,
            ..Default::default()
        })
        .run_with(move || App::new(config))
}

#[derive(Debug, Clone)]
enum Message {
    PickImage,
    ImagePicked(Option<PathBuf>),
    FileDropped(PathBuf),
    ImageLoaded(Result<UploadedImage, String>),
    StartAnalysis,
    Analysis(Epoch, StreamEvent),
    ChatInputChanged(String),
    SubmitChat,
    Chat(Epoch, TurnId, StreamEvent),
    CopyAnalysis,
    Reset,
    Tick,
}

struct App {
    config: Config,
    client: GeminiClient,
    session: Session,
    preview: Option<image::Handle>,
    chat_input: String,
    notice: Option<String>,
    frame: usize,
}

impl App {
    fn new(config: Config) -> (Self, Task<Message>) {
        let client = GeminiClient::from_config(&config.gemini);
        if client.has_credential() {
            info!(model = client.get_model(), "Gemini client ready");
        } else {
            warn!("No API key found in API_KEY or GEMINI_API_KEY; analysis will fail");
        }

        let app = App {
            config,
            client,
            session: Session::default(),
            preview: None,
            chat_input: String::new(),
            notice: None,
            frame: 0,
        };

        (app, Task::none())
    }

    fn load_image(path: PathBuf) -> Task<Message> {
        Task::perform(
            async move {
                upload::read_image(&path)
                    .await
                    .map_err(|e| format!("{:#}", e))
            },
            Message::ImageLoaded,
        )
    }

    fn update(&mut self, message: Message) -> Task<Message> {
        match message {
            Message::PickImage => Task::perform(
                async {
                    rfd::AsyncFileDialog::new()
                        .set_title("Choose a manuscript image")
                        .add_filter("Images", &upload::IMAGE_EXTENSIONS)
                        .pick_file()
                        .await
                        .map(|handle| handle.path().to_path_buf())
                },
                Message::ImagePicked,
            ),
            Message::ImagePicked(Some(path)) | Message::FileDropped(path) => Self::load_image(path),
            Message::ImagePicked(None) => {
                self.session.select_image(None);
                Task::none()
            }
            Message::ImageLoaded(Ok(image)) => {
                self.preview = Some(image::Handle::from_bytes(image.bytes.clone()));
                self.session.select_image(Some(image));
                self.chat_input.clear();
                self.notice = None;
                Task::none()
            }
            Message::ImageLoaded(Err(error)) => {
                warn!(%error, "Image rejected");
                self.notice = Some(error);
                Task::none()
            }
            Message::StartAnalysis => {
                let prompt = self.config.gemini.analysis_prompt.as_deref();
                match self.session.start_analysis(&self.client, prompt) {
                    Some(stream) => {
                        let epoch = stream.epoch;
                        Task::stream(stream.events.map(move |event| Message::Analysis(epoch, event)))
                    }
                    None => Task::none(),
                }
            }
            Message::Analysis(epoch, event) => {
                self.session.apply_analysis(epoch, event);
                Task::none()
            }
            Message::ChatInputChanged(value) => {
                self.chat_input = value;
                Task::none()
            }
            Message::SubmitChat => {
                let before = self.session.transcript().len();
                let stream = self.session.submit_chat(&self.client, &self.chat_input);
                if self.session.transcript().len() != before {
                    self.chat_input.clear();
                }
                match stream {
                    Some(stream) => {
                        let (epoch, turn) = (stream.epoch, stream.turn);
                        Task::stream(stream.events.map(move |event| Message::Chat(epoch, turn, event)))
                    }
                    None => Task::none(),
                }
            }
            Message::Chat(epoch, turn, event) => {
                self.session.apply_chat(epoch, turn, event);
                Task::none()
            }
            Message::CopyAnalysis => clipboard::write(self.session.analysis().text().to_string()),
            Message::Reset => {
                self.session.reset();
                self.preview = None;
                self.chat_input.clear();
                self.notice = None;
                Task::none()
            }
            Message::Tick => {
                self.frame = (self.frame + 1) % 40;
                Task::none()
            }
        }
    }

    fn subscription(&self) -> Subscription<Message> {
        let timer = if self.session.analysis().is_analyzing() || self.session.is_chat_busy() {
            time::every(Duration::from_millis(120)).map(|_| Message::Tick)
        } else {
            Subscription::none()
        };

        Subscription::batch([timer, event::listen_with(window_message)])
    }

    fn view(&self) -> Element<Message> {
        let mut header = row![text("CODEX DECIPHER").size(22)]
            .align_y(alignment::Vertical::Center)
            .padding(Padding::from([10, 16]));

        if self.session.image().is_some() {
            header = header
                .push(horizontal_space())
                .push(button(text("New Scan").size(14)).on_press(Message::Reset).padding(8));
        }

        let body = if self.session.image().is_some() {
            self.workspace_view()
        } else {
            self.upload_view()
        };

        container(column![header, body].spacing(4))
            .width(Length::Fill)
            .height(Length::Fill)
            .into()
    }

    fn upload_view(&self) -> Element<Message> {
        let mut content = column![
            text("Decode the Unknown").size(36),
            text("Load an image of an ancient manuscript, undeciphered text, or mysterious symbol. The model will analyze the script, interpret illustrations, and provide historical context.")
                .size(16)
                .width(560)
                .align_x(alignment::Horizontal::Center),
            button(text("Choose image").size(16)).on_press(Message::PickImage).padding(14),
            text("or drop a file onto this window  •  JPG, PNG, WEBP").size(13),
        ]
        .spacing(18)
        .align_x(alignment::Horizontal::Center);

        if let Some(notice) = &self.notice {
            content = content.push(text(notice.as_str()).size(14).style(text::danger));
        }
        if !self.client.has_credential() {
            content = content.push(
                text("API_KEY is not set. Analysis requests will fail until it is.")
                    .size(13)
                    .style(text::danger),
            );
        }

        content = content.push(text(format!("POWERED BY {}", self.client.get_model().to_uppercase())).size(12));

        container(content)
            .width(Length::Fill)
            .height(Length::Fill)
            .align_x(alignment::Horizontal::Center)
            .align_y(alignment::Vertical::Center)
            .into()
    }

    fn workspace_view(&self) -> Element<Message> {
        let analysis = self.session.analysis();

        let mut left = Column::new().spacing(12).width(Length::FillPortion(1));

        if let Some(handle) = &self.preview {
            left = left.push(
                container(image(handle.clone()).content_fit(iced::ContentFit::Contain))
                    .width(Length::Fill)
                    .height(Length::Fill)
                    .align_x(alignment::Horizontal::Center)
                    .align_y(alignment::Vertical::Center),
            );
        }

        if let Some(image) = self.session.image() {
            left = left.push(
                text(format!(
                    "{}  •  {}×{}  •  {}",
                    image.file_name(),
                    image.width,
                    image.height,
                    image.media_type
                ))
                .size(12),
            );
        }

        if analysis.is_analyzing() {
            let dots = ".".repeat(self.frame % 4);
            left = left.push(text(format!("PROCESSING_GLYPHS{}", dots)).size(12));
        }

        let label = match analysis {
            AnalysisState::Idle => "INITIATE DECODING",
            AnalysisState::Analyzing { .. } => "DECODING...",
            AnalysisState::Complete { .. } => "ANALYSIS COMPLETE",
            AnalysisState::Failed { .. } => "RETRY DECODING",
        };
        let mut action = button(text(label).size(16).width(Length::Fill).align_x(alignment::Horizontal::Center))
            .width(Length::Fill)
            .padding(14);
        if analysis.can_start() {
            action = action.on_press(Message::StartAnalysis);
        }
        left = left.push(action);

        let right = container(self.results_view())
            .width(Length::FillPortion(1))
            .height(Length::Fill)
            .style(container::bordered_box);

        row![left, right]
            .spacing(16)
            .padding(16)
            .height(Length::Fill)
            .into()
    }

    fn results_view(&self) -> Element<Message> {
        let analysis = self.session.analysis();

        if analysis.is_idle() {
            return container(
                column![
                    text("\"The past is a foreign country; they do things differently there.\"").size(16),
                    text("Ready to analyze visual and textual layers.").size(13),
                ]
                .spacing(8)
                .align_x(alignment::Horizontal::Center),
            )
            .width(Length::Fill)
            .height(Length::Fill)
            .align_x(alignment::Horizontal::Center)
            .align_y(alignment::Vertical::Center)
            .into();
        }

        let mut results = Column::new().spacing(16).padding(20);

        if let Some(error) = analysis.error() {
            results = results.push(
                container(
                    column![
                        text("Decryption Error").size(18).style(text::danger),
                        text(error).size(14),
                    ]
                    .spacing(6),
                )
                .padding(12)
                .style(container::bordered_box),
            );
        }

        let transcript = self.session.transcript();
        if transcript.is_empty() {
            results = results.push(render::markdown(analysis.text()));
        } else {
            results = results.push(text("INITIAL FINDINGS").size(12));
            results = results.push(
                scrollable(render::markdown(analysis.text())).height(220),
            );

            for turn in transcript {
                let bubble: Element<Message> = match turn.speaker {
                    Speaker::User => text(turn.text.as_str()).size(15).into(),
                    Speaker::Assistant if turn.text.is_empty() => {
                        text(".".repeat(1 + self.frame % 3)).size(18).into()
                    }
                    Speaker::Assistant => render::markdown(&turn.text),
                };
                let bubble = container(bubble)
                    .padding(12)
                    .max_width(520)
                    .style(container::rounded_box);

                let aligned = match turn.speaker {
                    Speaker::User => row![horizontal_space(), bubble],
                    Speaker::Assistant => row![bubble, horizontal_space()],
                };
                results = results.push(aligned);
            }
        }

        if analysis.is_analyzing() {
            results = results.push(text("▌").size(16));
        }

        let mut panel = column![scrollable(results)
            .anchor_bottom()
            .height(Length::Fill)]
        .spacing(8);

        if matches!(analysis, AnalysisState::Complete { .. }) {
            panel = panel.push(
                container(button(text("[Copy]").size(14)).on_press(Message::CopyAnalysis).padding(8))
                    .width(Length::Fill)
                    .align_x(alignment::Horizontal::Right)
                    .padding(Padding::from([0, 12])),
            );
        }

        if matches!(analysis, AnalysisState::Complete { .. }) || !transcript.is_empty() {
            let mut input = text_input("Ask a specific question about the manuscript...", &self.chat_input)
                .padding(12)
                .size(15);
            if !self.session.is_chat_busy() {
                input = input
                    .on_input(Message::ChatInputChanged)
                    .on_submit(Message::SubmitChat);
            }

            let mut send = button(text("Ask").size(15)).padding(12);
            if !self.session.is_chat_busy() && !self.chat_input.trim().is_empty() {
                send = send.on_press(Message::SubmitChat);
            }

            panel = panel.push(row![input, send].spacing(8).padding(12));
        }

        panel.into()
    }

    fn theme(&self) -> Theme {
        Theme::TokyoNight
    }
}

/// Only file drops are handled globally; everything else goes to the widgets.
fn window_message(event: IcedEvent, _status: event::Status, _id: window::Id) -> Option<Message> {
    match event {
        IcedEvent::Window(window::Event::FileDropped(path)) => Some(Message::FileDropped(path)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_file_drops_become_messages() {
        let id = window::Id::unique();
        let dropped = window_message(
            IcedEvent::Window(window::Event::FileDropped(PathBuf::from("folio.png"))),
            event::Status::Ignored,
            id,
        );
        assert!(matches!(dropped, Some(Message::FileDropped(path)) if path == PathBuf::from("folio.png")));

        for other in [
            IcedEvent::Window(window::Event::Focused),
            IcedEvent::Window(window::Event::CloseRequested),
        ] {
            assert!(window_message(other, event::Status::Ignored, id).is_none());
        }
    }
}
