use tickwire::{ClientEvent, NetClient, PacketChannel, SlotIndex, TransportError};

/// What the run loop should do after an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop(String),
}

/// Scripted console session: once connected, says the queued lines and
/// optionally starts spectating another slot.
pub struct Session<C: PacketChannel> {
    client: NetClient<C>,
    pending_lines: Vec<String>,
    spectate: Option<SlotIndex>,
}

impl<C: PacketChannel> Session<C> {
    pub fn new(client: NetClient<C>, lines: Vec<String>, spectate: Option<SlotIndex>) -> Self {
        Self {
            client,
            pending_lines: lines,
            spectate,
        }
    }

    pub fn client(&self) -> &NetClient<C> {
        &self.client
    }

    pub fn tick(&mut self) -> Result<Flow, TransportError> {
        self.client.tick()?;

        let events: Vec<ClientEvent> = self.client.drain_events().collect();
        for event in events {
            if let Flow::Stop(reason) = self.handle(event) {
                return Ok(Flow::Stop(reason));
            }
        }
        Ok(Flow::Continue)
    }

    fn handle(&mut self, event: ClientEvent) -> Flow {
        match event {
            ClientEvent::Connected {
                slot,
                client_id,
                server_name,
            } => {
                println!("connected to '{}' as client {} in slot {}", server_name, client_id, slot);
                for line in self.pending_lines.drain(..) {
                    self.client.say(&line);
                }
                if let Some(target) = self.spectate.take() {
                    match self.client.spectate(target) {
                        Ok(()) => println!("spectating slot {}", target),
                        Err(err) => log::warn!("cannot spectate slot {}: {}", target, err),
                    }
                }
                Flow::Continue
            }
            ClientEvent::Refused { reason } => Flow::Stop(format!("refused: {}", reason)),
            ClientEvent::Disconnected { reason } => Flow::Stop(reason),
            ClientEvent::Chat { name, text, .. } => {
                println!("<{}> {}", name, text);
                Flow::Continue
            }
            ClientEvent::ConsoleText { text } => {
                println!("{}", text);
                Flow::Continue
            }
            ClientEvent::PlayerJoined { slot, name } => {
                println!("{} joined (slot {})", name, slot);
                Flow::Continue
            }
            ClientEvent::PlayerLeft { slot, name } => {
                println!("{} left (slot {})", name, slot);
                Flow::Continue
            }
            ClientEvent::MessageDropped { message } => {
                log::warn!("server never acknowledged {:?}", message);
                Flow::Continue
            }
        }
    }

    pub fn disconnect(&mut self) -> Result<(), TransportError> {
        self.client.disconnect()
    }
}
