//! Command dispatch for the reference server.
//!
//! Only the handful of verbs needed to register, join channels and talk are
//! understood. Everything else gets `ERR_UNKNOWNCOMMAND`.

use std::sync::Arc;

use irc::proto::{Command, Message, Response};
use tracing::debug;

use super::Server;
use crate::channel::Channel;
use crate::error::TransportResult;
use crate::session::Session;

/// What the read loop should do after a message has been handled.
#[derive(Debug)]
pub(super) enum Flow {
    Continue,
    Quit(String),
}

fn is_channel_name(target: &str) -> bool {
    target.starts_with('#') || target.starts_with('&')
}

/// First word of the command as it would appear on the wire.
fn verb(command: &Command) -> String {
    let line = Message {
        tags: None,
        prefix: None,
        command: command.clone(),
    }
    .to_string();
    line.split_whitespace().next().unwrap_or_default().to_string()
}

impl Server {
    pub(super) async fn dispatch(
        &self,
        session: &Arc<Session>,
        message: Message,
    ) -> TransportResult<Flow> {
        match message.command {
            Command::NICK(nick) => self.handle_nick(session, &nick).await?,
            Command::USER(user, _, realname) => self.handle_user(session, user, realname).await?,
            Command::PING(token, _) => {
                let pong = Message {
                    tags: None,
                    prefix: None,
                    command: Command::PONG(self.config.name.clone(), Some(token)),
                };
                session.send(&[pong]).await?;
            }
            Command::QUIT(reason) => {
                return Ok(Flow::Quit(reason.unwrap_or_else(|| "Client quit".to_string())));
            }
            command if !session.is_registered() => {
                debug!(session = %session, verb = %verb(&command), "refused before registration");
                let reply = self.numeric(session, Response::ERR_NOTREGISTERED, &["You have not registered"]);
                session.send(&[reply]).await?;
            }
            Command::JOIN(channels, _, _) => {
                for name in channels.split(',').filter(|n| !n.is_empty()) {
                    self.handle_join(session, name).await?;
                }
            }
            Command::PART(channels, reason) => {
                for name in channels.split(',').filter(|n| !n.is_empty()) {
                    self.handle_part(session, name, reason.clone()).await?;
                }
            }
            Command::PRIVMSG(target, text) => {
                self.handle_message(session, &target, text, false).await?;
            }
            Command::NOTICE(target, text) => {
                self.handle_message(session, &target, text, true).await?;
            }
            command => {
                let verb = verb(&command);
                let reply =
                    self.numeric(session, Response::ERR_UNKNOWNCOMMAND, &[verb.as_str(), "Unknown command"]);
                session.send(&[reply]).await?;
            }
        }
        Ok(Flow::Continue)
    }

    async fn handle_nick(&self, session: &Arc<Session>, nick: &str) -> TransportResult<()> {
        if nick.is_empty() {
            let reply = self.numeric(session, Response::ERR_NONICKNAMEGIVEN, &["No nickname given"]);
            return session.send(&[reply]).await;
        }

        let was_registered = session.is_registered();
        let old_prefix = session.prefix();
        if !self.claim_nickname(session, nick) {
            let reply = self.numeric(
                session,
                Response::ERR_NICKNAMEINUSE,
                &[nick, "Nickname is already in use"],
            );
            return session.send(&[reply]).await;
        }

        if was_registered {
            let change = Message {
                tags: None,
                prefix: Some(old_prefix),
                command: Command::NICK(nick.to_string()),
            };
            let mut recipients = session.visible_to();
            recipients.push(Arc::clone(session));
            self.deliver(&recipients, &change).await;
            Ok(())
        } else if session.is_registered() {
            self.welcome(session).await
        } else {
            Ok(())
        }
    }

    async fn handle_user(
        &self,
        session: &Arc<Session>,
        user: String,
        realname: String,
    ) -> TransportResult<()> {
        if session.is_registered() {
            let reply = self.numeric(
                session,
                Response::ERR_ALREADYREGISTRED,
                &["You may not reregister"],
            );
            return session.send(&[reply]).await;
        }
        session.set_username(user);
        session.set_realname(realname);
        if session.is_registered() {
            self.welcome(session).await?;
        }
        Ok(())
    }

    async fn welcome(&self, session: &Arc<Session>) -> TransportResult<()> {
        let welcome = format!("Welcome to the Internet Relay Network {}", session);
        let your_host = format!("Your host is {}", self.config.name);
        let motd_start = format!("- {} Message of the day - ", self.config.name);
        let motd = format!("- {}", self.config.motd);
        let burst = [
            self.numeric(session, Response::RPL_WELCOME, &[welcome.as_str()]),
            self.numeric(session, Response::RPL_YOURHOST, &[your_host.as_str()]),
            self.numeric(session, Response::RPL_MOTDSTART, &[motd_start.as_str()]),
            self.numeric(session, Response::RPL_MOTD, &[motd.as_str()]),
            self.numeric(session, Response::RPL_ENDOFMOTD, &["End of MOTD command"]),
        ];
        session.send(&burst).await
    }

    async fn handle_join(&self, session: &Arc<Session>, name: &str) -> TransportResult<()> {
        if !is_channel_name(name) {
            let reply = self.numeric(session, Response::ERR_NOSUCHCHANNEL, &[name, "No such channel"]);
            return session.send(&[reply]).await;
        }

        let channel = match self.enter_channel(session, name) {
            Some(channel) => channel,
            None => return Ok(()),
        };

        let join = self.from_session(session, Command::JOIN(channel.name().to_string(), None, None));
        self.deliver(&channel.members(), &join).await;

        let names = channel
            .members()
            .iter()
            .map(|m| m.nickname())
            .collect::<Vec<_>>()
            .join(" ");
        let replies = [
            self.numeric(session, Response::RPL_NAMREPLY, &["=", channel.name(), names.as_str()]),
            self.numeric(session, Response::RPL_ENDOFNAMES, &[channel.name(), "End of /NAMES list"]),
        ];
        session.send(&replies).await
    }

    async fn handle_part(
        &self,
        session: &Arc<Session>,
        name: &str,
        reason: Option<String>,
    ) -> TransportResult<()> {
        let channel = match self.find_channel(name) {
            Some(channel) if session.is_member(name) => channel,
            _ => {
                let reply =
                    self.numeric(session, Response::ERR_NOTONCHANNEL, &[name, "You're not on that channel"]);
                return session.send(&[reply]).await;
            }
        };

        let part = self.from_session(session, Command::PART(channel.name().to_string(), reason));
        self.deliver(&channel.members(), &part).await;
        session.part(name);
        self.leave_channel(session, name);
        Ok(())
    }

    async fn handle_message(
        &self,
        session: &Arc<Session>,
        target: &str,
        text: String,
        notice: bool,
    ) -> TransportResult<()> {
        let command = if notice {
            Command::NOTICE(target.to_string(), text)
        } else {
            Command::PRIVMSG(target.to_string(), text)
        };

        if is_channel_name(target) {
            let channel = match self.find_channel(target) {
                Some(channel) => channel,
                None if notice => return Ok(()),
                None => {
                    let reply =
                        self.numeric(session, Response::ERR_NOSUCHCHANNEL, &[target, "No such channel"]);
                    return session.send(&[reply]).await;
                }
            };
            if !session.is_member(target) {
                if notice {
                    return Ok(());
                }
                let reply = self.numeric(
                    session,
                    Response::ERR_CANNOTSENDTOCHAN,
                    &[target, "Cannot send to channel"],
                );
                return session.send(&[reply]).await;
            }
            let recipients: Vec<_> = channel
                .members()
                .into_iter()
                .filter(|m| !Arc::ptr_eq(m, session))
                .collect();
            let message = self.from_session(session, command);
            self.deliver(&recipients, &message).await;
            return Ok(());
        }

        match self.find_registered(target) {
            Some(recipient) => {
                let message = self.from_session(session, command);
                self.deliver(&[recipient], &message).await;
                Ok(())
            }
            None if notice => Ok(()),
            None => {
                let reply = self.numeric(session, Response::ERR_NOSUCHNICK, &[target, "No such nick/channel"]);
                session.send(&[reply]).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_channel_name() {
        assert!(is_channel_name("#general"));
        assert!(is_channel_name("&local"));
        assert!(!is_channel_name("alice"));
        assert!(!is_channel_name(""));
    }

    #[test]
    fn test_verb() {
        assert_eq!(verb(&Command::NICK("alice".into())), "NICK");
        assert_eq!(verb(&Command::Raw("FROB".into(), vec!["x".into()])), "FROB");
    }
}
