use std::sync::Arc;

use poise::serenity_prelude::{self as serenity, async_trait};

use crate::round::Announce;
use crate::{Data, Error};

/// Posts round announcements as embeds in the configured text channel.
pub struct ChannelAnnouncer {
    http: Arc<serenity::Http>,
    channel: serenity::ChannelId,
}

impl ChannelAnnouncer {
    pub fn new(http: Arc<serenity::Http>, channel: serenity::ChannelId) -> Self {
        Self { http, channel }
    }
}

#[async_trait]
impl Announce for ChannelAnnouncer {
    async fn announce(&self, title: Option<&str>, body: &str) -> anyhow::Result<()> {
        let mut embed = serenity::CreateEmbed::new()
            .description(body)
            .colour(serenity::Colour::new(0x3498db));
        if let Some(title) = title {
            embed = embed.title(title);
        }
        self.channel
            .send_message(&self.http, serenity::CreateMessage::new().embed(embed))
            .await?;
        Ok(())
    }
}

pub async fn event_handler(
    ctx: &serenity::Context,
    event: &serenity::FullEvent,
    _framework: poise::FrameworkContext<'_, Data, Error>,
    data: &Data,
) -> Result<(), Error> {
    match event {
        serenity::FullEvent::Ready { data_about_bot } => {
            tracing::info!("✅ Logged in as {}!", data_about_bot.user.name);
            if data.game.config.autostart && !data.game.is_running() {
                match songbird::get(ctx).await {
                    Some(manager) => {
                        data.game.start(ctx.http.clone(), manager).await;
                    }
                    None => tracing::error!("voice client was not initialised"),
                }
            }
        }
        serenity::FullEvent::Message { new_message } => {
            handle_guess(ctx, data, new_message).await?;
        }
        _ => {}
    }
    Ok(())
}

/// Routes a channel message to the judge and reports any credit right away.
async fn handle_guess(
    ctx: &serenity::Context,
    data: &Data,
    message: &serenity::Message,
) -> Result<(), Error> {
    if message.author.bot || message.channel_id.get() != data.game.config.music_text_channel {
        return Ok(());
    }

    let display_name = message
        .member
        .as_ref()
        .and_then(|member| member.nick.clone())
        .unwrap_or_else(|| message.author.display_name().to_string());

    if let Some(credit) =
        data.game
            .judge_message(message.author.id, &display_name, &message.content)
    {
        message
            .channel_id
            .say(
                &ctx.http,
                format!("✅ **{display_name}** got it! +{} pts", credit.points),
            )
            .await?;
    }
    Ok(())
}
